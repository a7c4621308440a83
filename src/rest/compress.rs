//! Block compression for binary payloads.
//!
//! Raw deflate at the fastest setting, behind a one-byte framing marker.
//! Blocks below the threshold, and blocks the compressor fails to shrink,
//! are stored verbatim so decompression cost is never paid for nothing.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Inputs smaller than this are stored rather than compressed.
pub const COMPRESS_THRESHOLD: usize = 512;

const MARKER_STORED: u8 = 0x00;
const MARKER_DEFLATE: u8 = 0x01;

/// Compress `input` into a marker-framed block.
#[must_use]
pub fn compress_block(input: &[u8]) -> Vec<u8> {
    if input.len() >= COMPRESS_THRESHOLD {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(input.len() / 2 + 1), Compression::fast());
        if encoder.write_all(input).is_ok() {
            if let Ok(compressed) = encoder.finish() {
                if compressed.len() < input.len() {
                    let mut out = Vec::with_capacity(compressed.len() + 1);
                    out.push(MARKER_DEFLATE);
                    out.extend_from_slice(&compressed);
                    return out;
                }
            }
        }
    }

    let mut out = Vec::with_capacity(input.len() + 1);
    out.push(MARKER_STORED);
    out.extend_from_slice(input);
    out
}

/// Decompress a marker-framed block, refusing outputs larger than `max`.
///
/// # Errors
///
/// - `Error::Decode` on an empty input, an unknown marker, or corrupt
///   deflate data
/// - `Error::FrameTooLarge` if the decompressed size exceeds `max`
pub fn decompress_block(input: &[u8], max: usize) -> Result<Vec<u8>> {
    let (&marker, data) = input
        .split_first()
        .ok_or_else(|| Error::Decode("Empty compressed block".into()))?;

    match marker {
        MARKER_STORED => Ok(data.to_vec()),
        MARKER_DEFLATE => {
            let mut out = Vec::new();
            let mut limited = DeflateDecoder::new(data).take(max as u64 + 1);
            limited
                .read_to_end(&mut out)
                .map_err(|e| Error::Decode(format!("Corrupt deflate block: {}", e)))?;
            if out.len() > max {
                return Err(Error::FrameTooLarge {
                    size: out.len(),
                    max,
                });
            }
            Ok(out)
        }
        other => Err(Error::Decode(format!(
            "Unknown compression marker: {:#x}",
            other
        ))),
    }
}
