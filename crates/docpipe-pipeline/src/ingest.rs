//! Byte-range document loading.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use docpipe_core::error::Result;
use docpipe_core::types::{DataLoadingConfig, Document};

/// Read `text_size` bytes starting at `offset` from the request's file.
///
/// Fewer bytes are returned when the range runs past end of file. Invalid
/// UTF-8 sequences (a range may split a multi-byte character) are replaced
/// rather than rejected.
pub fn load_data(request: &DataLoadingConfig) -> Result<Document> {
    let mut file = File::open(&request.file_path)?;
    file.seek(SeekFrom::Start(request.offset))?;

    let mut buf = Vec::with_capacity(request.text_size);
    file.take(request.text_size as u64).read_to_end(&mut buf)?;

    Ok(Document {
        id: request.id.clone(),
        text: String::from_utf8_lossy(&buf).into_owned(),
    })
}

/// Size in bytes of the file at `path`.
pub fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
