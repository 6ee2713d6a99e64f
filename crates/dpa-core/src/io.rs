//! Raw buffer file I/O.
//!
//! Trace files are bare sample data: native-endian element bytes, no
//! header. Failures carry the path and are logged before surfacing.

use std::fs;
use std::io::{Error, ErrorKind};
use std::path::Path;

use tracing::error;

use crate::buffer::Sample;

use crate::error::BufIoError;

fn io_error(path: &Path, source: Error) -> BufIoError {
    error!(path = %path.display(), %source, "buffer file operation failed");
    BufIoError {
        path: path.to_path_buf(),
        source,
    }
}

/// Fills `buf` from the raw sample file at `path`.
///
/// The file must hold at least `buf.len()` elements; trailing bytes are
/// ignored.
pub fn load_buf<T: Sample>(path: impl AsRef<Path>, buf: &mut [T]) -> Result<(), BufIoError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    let need = buf.len() * T::WIDTH;
    if bytes.len() < need {
        return Err(io_error(
            path,
            Error::new(
                ErrorKind::UnexpectedEof,
                format!("{} bytes on disk, need {need}", bytes.len()),
            ),
        ));
    }
    for (slot, chunk) in buf.iter_mut().zip(bytes[..need].chunks_exact(T::WIDTH)) {
        *slot = T::from_ne_bytes(chunk);
    }
    Ok(())
}

/// Reads the entire raw sample file at `path`.
///
/// The element count is the file size divided by the element width;
/// trailing partial elements are ignored.
pub fn load_vec<T: Sample>(path: impl AsRef<Path>) -> Result<Vec<T>, BufIoError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    Ok(bytes
        .chunks_exact(T::WIDTH)
        .map(T::from_ne_bytes)
        .collect())
}

/// Writes `buf` to `path` as raw native-endian sample bytes.
pub fn write_buf<T: Sample>(path: impl AsRef<Path>, buf: &[T]) -> Result<(), BufIoError> {
    let path = path.as_ref();
    let mut bytes = vec![0u8; buf.len() * T::WIDTH];
    for (chunk, v) in bytes.chunks_exact_mut(T::WIDTH).zip(buf.iter()) {
        v.write_ne_bytes(chunk);
    }
    fs::write(path, &bytes).map_err(|e| io_error(path, e))
}
