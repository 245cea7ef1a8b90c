//! Positioned, shareable reads over one source file
//!
//! Several connections may stream different parts of the same file at once, so
//! reads never go through a shared cursor. The handle is opened on first use
//! and released once every part has been read.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared handle to one file being posted
#[derive(Debug)]
pub struct FileWrap {
    path: PathBuf,
    remaining: AtomicU32,
    handle: Mutex<Option<Arc<File>>>,
}

impl FileWrap {
    /// Wrap `path`, which will be read as `parts` ranges
    pub fn new(path: impl Into<PathBuf>, parts: u32) -> Self {
        Self {
            path: path.into(),
            remaining: AtomicU32::new(parts),
            handle: Mutex::new(None),
        }
    }

    /// Whether the file is currently held open
    pub fn is_open(&self) -> bool {
        self.handle.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Read exactly `end - begin` bytes starting at absolute offset `begin`
    ///
    /// # Errors
    ///
    /// Returns an error if the range is inverted, the file cannot be opened,
    /// or the file is shorter than `end`.
    pub fn read_part(&self, begin: u64, end: u64) -> io::Result<Vec<u8>> {
        if end < begin {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid range {begin}..{end}"),
            ));
        }

        let file = self.file()?;
        let len = usize::try_from(end - begin)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;
        let mut buf = vec![0u8; len];
        read_exact_at(&file, &mut buf, begin)?;
        drop(file);

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("closing {}", self.path.display());
            if let Ok(mut handle) = self.handle.lock() {
                handle.take();
            }
        }

        Ok(buf)
    }

    fn file(&self) -> io::Result<Arc<File>> {
        let mut handle = self
            .handle
            .lock()
            .map_err(|_| io::Error::other("file handle lock poisoned"))?;
        if let Some(file) = handle.as_ref() {
            return Ok(Arc::clone(file));
        }
        debug!("opening {}", self.path.display());
        let file = Arc::new(File::open(&self.path)?);
        *handle = Some(Arc::clone(&file));
        Ok(file)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
