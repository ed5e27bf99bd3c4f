//! Gzip request and response bodies.

use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::HeaderMap;
use std::io::{Read, Write};

/// Compresses a request body with gzip at the default level.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::SerializationFailed(format!("gzip encoding failed: {e}")))
}

/// Decompresses a gzip response body.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(Error::Decompression)?;
    Ok(decoded)
}

/// Returns `true` if the headers announce a gzip-encoded body.
pub fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}
