//! Raw image writer for block devices
//!
//! Preconditions are checked before the device is touched, so any error up to
//! and including the signature wipe is recoverable. Once the first image byte
//! is written, every failure is [`WriteError::Fatal`].
//!
//! The caller must not perform any I/O against the replaced device, or the
//! filesystem it used to hold, after [`write_image`] returns.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::error::WriteError;

/// Device write options
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Accept a regular file as target (rehearsals and tests)
    pub allow_regular_file: bool,
    /// Copy buffer size
    pub chunk_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            allow_regular_file: false,
            chunk_size: defaults::DEVICE_WRITE_CHUNK,
        }
    }
}

/// Completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub device: PathBuf,
    pub bytes_written: u64,
    /// Capacity of the target; `None` for regular files
    pub device_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Block,
    File,
}

#[cfg(unix)]
fn is_block_device(file_type: std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_file_type: std::fs::FileType) -> bool {
    false
}

fn target_kind(device: &Path, allow_regular_file: bool) -> Result<TargetKind, WriteError> {
    let metadata = std::fs::metadata(device).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => WriteError::DeviceNotFound {
            path: device.to_path_buf(),
        },
        _ => WriteError::Preflight {
            path: device.to_path_buf(),
            error: e.to_string(),
        },
    })?;

    if is_block_device(metadata.file_type()) {
        Ok(TargetKind::Block)
    } else if metadata.is_file() && allow_regular_file {
        Ok(TargetKind::File)
    } else {
        Err(WriteError::NotBlockDevice {
            path: device.to_path_buf(),
        })
    }
}

/// Zero the primary and backup partition table areas
fn wipe_signatures(target: &mut File, device_size: u64) -> io::Result<()> {
    let head = defaults::SIGNATURE_WIPE_BYTES.min(device_size);
    let tail_start = device_size.saturating_sub(defaults::SIGNATURE_WIPE_BYTES).max(head);
    let zeros = vec![0u8; usize::try_from(defaults::SIGNATURE_WIPE_BYTES).unwrap_or(usize::MAX)];

    target.seek(SeekFrom::Start(0))?;
    target.write_all(&zeros[..usize::try_from(head).unwrap_or(zeros.len())])?;

    let tail = device_size - tail_start;
    if tail > 0 {
        target.seek(SeekFrom::Start(tail_start))?;
        target.write_all(&zeros[..usize::try_from(tail).unwrap_or(zeros.len())])?;
    }
    target.sync_data()
}

/// Write a raw image onto a block device and flush it
pub fn write_image(
    image: &Path,
    device: &Path,
    options: &WriteOptions,
) -> Result<WriteReport, WriteError> {
    let kind = target_kind(device, options.allow_regular_file)?;

    let preflight = |path: &Path, e: io::Error| WriteError::Preflight {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut source = File::open(image).map_err(|e| preflight(image, e))?;
    let image_size = source.metadata().map_err(|e| preflight(image, e))?.len();
    if image_size == 0 {
        return Err(WriteError::Preflight {
            path: image.to_path_buf(),
            error: "image is empty".to_string(),
        });
    }

    let mut target = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(|e| preflight(device, e))?;

    let device_size = match kind {
        TargetKind::Block => {
            let size = target.seek(SeekFrom::End(0)).map_err(|e| preflight(device, e))?;
            if image_size > size {
                return Err(WriteError::ImageTooLarge {
                    path: device.to_path_buf(),
                    image: image_size,
                    device: size,
                });
            }
            Some(size)
        }
        TargetKind::File => None,
    };

    tracing::info!("Wiping partition signatures on {}", device.display());
    let wipe = match device_size {
        Some(size) => wipe_signatures(&mut target, size),
        None => target.set_len(0),
    };
    wipe.map_err(|e| WriteError::Wipe {
        path: device.to_path_buf(),
        error: e.to_string(),
    })?;

    tracing::info!(
        "Writing {} ({} bytes) to {}",
        image.display(),
        image_size,
        device.display()
    );

    let mut written: u64 = 0;
    let copied = copy_and_sync(
        &mut source,
        &mut target,
        options.chunk_size.max(1),
        &mut written,
    );
    if let Err(e) = copied {
        tracing::error!(
            "Write to {} failed after {} bytes: {}",
            device.display(),
            written,
            e
        );
        return Err(WriteError::Fatal {
            path: device.to_path_buf(),
            written,
            error: e.to_string(),
        });
    }

    Ok(WriteReport {
        device: device.to_path_buf(),
        bytes_written: written,
        device_size,
    })
}

fn copy_and_sync(
    source: &mut File,
    target: &mut File,
    chunk_size: usize,
    written: &mut u64,
) -> io::Result<()> {
    target.seek(SeekFrom::Start(0))?;
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        target.write_all(&buffer[..n])?;
        *written += n as u64;
    }
    target.flush()?;
    target.sync_all()
}
