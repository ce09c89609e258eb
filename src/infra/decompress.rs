//! Streaming decompression of disk images
//!
//! The compressed input is streamed straight into the raw output and removed
//! once the output is complete, so peak disk usage is compressed + raw size.
//! A failed run removes the partial output and keeps the input.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use crate::config::defaults;
use crate::core::model::Codec;
use crate::error::DecompressionError;

/// Result of a successful decompression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Path of the raw image
    pub path: PathBuf,
    /// Size of the consumed compressed input
    pub compressed_size: u64,
    /// Size of the raw image
    pub raw_size: u64,
}

/// Decompress `input` into `output`
///
/// Blocking; run it on a blocking thread from async code.
pub fn decompress(
    input: &Path,
    output: &Path,
    codec: Codec,
) -> Result<RawImage, DecompressionError> {
    let compressed_size = std::fs::metadata(input)
        .map_err(|e| DecompressionError::Io {
            path: input.to_path_buf(),
            error: e.to_string(),
        })?
        .len();

    let raw_size = match stream(input, output, codec) {
        Ok(size) => size,
        Err(e) => {
            // Never leave a half-written raw image behind
            let _ = std::fs::remove_file(output);
            return Err(e);
        }
    };

    std::fs::remove_file(input).map_err(|e| DecompressionError::Io {
        path: input.to_path_buf(),
        error: e.to_string(),
    })?;

    tracing::info!(
        "Decompressed {} ({} bytes) to {} ({} bytes)",
        input.display(),
        compressed_size,
        output.display(),
        raw_size
    );

    Ok(RawImage {
        path: output.to_path_buf(),
        compressed_size,
        raw_size,
    })
}

fn stream(input: &Path, output: &Path, codec: Codec) -> Result<u64, DecompressionError> {
    let source = File::open(input).map_err(|e| DecompressionError::Io {
        path: input.to_path_buf(),
        error: e.to_string(),
    })?;
    let source = BufReader::new(source);

    let mut decoder: Box<dyn Read> = match codec {
        Codec::Xz => Box::new(XzDecoder::new_multi_decoder(source)),
        Codec::Gz => Box::new(MultiGzDecoder::new(source)),
    };

    let sink = File::create(output).map_err(|e| DecompressionError::Io {
        path: output.to_path_buf(),
        error: e.to_string(),
    })?;
    let mut sink = BufWriter::new(sink);

    let write_err = |e: io::Error| DecompressionError::Io {
        path: output.to_path_buf(),
        error: e.to_string(),
    };

    let mut buffer = vec![0u8; defaults::DEVICE_WRITE_CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = match decoder.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(DecompressionError::Truncated {
                    path: input.to_path_buf(),
                    error: e.to_string(),
                })
            }
        };
        sink.write_all(&buffer[..n]).map_err(write_err)?;
        total += n as u64;
    }

    if total == 0 {
        return Err(DecompressionError::Truncated {
            path: input.to_path_buf(),
            error: "stream decoded to zero bytes".to_string(),
        });
    }

    let file = sink.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    Ok(total)
}
