//! Campaign plumbing for the `dpa` command-line tool.
//!
//! The binary deals in raw sample files; this crate supplies the format
//! selection, trace directory enumeration and the worker pool that feeds
//! a [`Correlator`] from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::warn;

use dpa_core::buffer::TraceBuffer;
use dpa_core::correlator::Correlator;
use dpa_core::io::load_buf;

/// On-disk sample element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    U16,
    F32,
}

impl SampleFormat {
    /// Parses a format name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "byte" => Some(Self::U8),
            "u16" | "short" => Some(Self::U16),
            "f32" | "float" => Some(Self::F32),
            _ => None,
        }
    }

    /// Element width in bytes.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Lists the regular files of a trace directory in sorted order. The
/// position of each file is its trace index.
pub fn list_trace_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn ingest_one(
    correlator: &Correlator,
    trace_idx: usize,
    path: &Path,
    format: SampleFormat,
) -> bool {
    let result = match format {
        SampleFormat::U8 => {
            let mut buf = TraceBuffer::<u8>::new(correlator.samples());
            match load_buf(path, buf.as_mut_slice()) {
                Ok(()) => correlator.add_trace_u8(trace_idx, buf.as_slice()),
                Err(_) => return false,
            }
        }
        SampleFormat::U16 => {
            let mut buf = TraceBuffer::<u16>::new(correlator.samples());
            match load_buf(path, buf.as_mut_slice()) {
                Ok(()) => correlator.add_trace_u16(trace_idx, buf.as_slice()),
                Err(_) => return false,
            }
        }
        SampleFormat::F32 => {
            let mut buf = TraceBuffer::<f32>::new(correlator.samples());
            match load_buf(path, buf.as_mut_slice()) {
                Ok(()) => correlator.add_trace_float(trace_idx, buf.as_slice()),
                Err(_) => return false,
            }
        }
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), %err, "trace discarded");
            false
        }
    }
}

/// Feeds every file to the correlator through a pool of `workers`
/// threads. Each worker claims trace indices from a shared counter, so
/// no two workers touch the same index. Unreadable or misshapen traces
/// are logged and skipped. Returns the number of traces ingested.
pub fn ingest_directory(
    correlator: &Correlator,
    files: &[PathBuf],
    format: SampleFormat,
    workers: usize,
) -> usize {
    let workers = workers.max(1);
    let next = AtomicUsize::new(0);
    let ingested = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let t = next.fetch_add(1, Ordering::Relaxed);
                if t >= files.len() {
                    break;
                }
                if ingest_one(correlator, t, &files[t], format) {
                    ingested.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    ingested.into_inner()
}
