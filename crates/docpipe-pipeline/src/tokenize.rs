use docpipe_core::error::Result;
use docpipe_core::types::{Document, Token, TokenizedDoc};

/// Lowercase the text and split it into runs of alphabetic characters.
///
/// Digits, punctuation and whitespace are all separators. Never fails; the
/// `Result` lets it plug straight into a stage.
pub fn tokenize(doc: Document) -> Result<TokenizedDoc> {
    let text = doc.text.to_lowercase();
    let tokens = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|term| !term.is_empty())
        .map(Token::new)
        .collect();

    Ok(TokenizedDoc { id: doc.id, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(text: &str) -> Vec<String> {
        let doc = Document {
            id: "doc-0".to_string(),
            text: text.to_string(),
        };
        tokenize(doc)
            .unwrap()
            .tokens
            .into_iter()
            .map(|t| t.term)
            .collect()
    }

    #[test]
    fn test_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            terms("Hello, World! It's me."),
            vec!["hello", "world", "it", "s", "me"]
        );
    }

    #[test]
    fn test_digits_are_separators() {
        assert_eq!(terms("abc123def 42"), vec!["abc", "def"]);
    }

    #[test]
    fn test_unicode_letters_kept() {
        assert_eq!(terms("Ça va? Straße"), vec!["ça", "va", "straße"]);
    }

    #[test]
    fn test_empty_and_separator_only() {
        assert!(terms("").is_empty());
        assert!(terms("  123 ,.;  ").is_empty());
    }

    #[test]
    fn test_keeps_id() {
        let doc = Document {
            id: "doc-9".to_string(),
            text: "ACT I".to_string(),
        };
        assert_eq!(tokenize(doc).unwrap().id, "doc-9");
    }
}
