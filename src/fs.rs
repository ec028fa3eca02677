//! Filesystem abstraction for BLOB persistence.
//!
//! The client never touches `std::fs` directly; it writes decoded BLOB
//! artifacts through an injected [`BlobFs`]. [`DiskFs`] is the real
//! thing, [`MemFs`] keeps everything in memory for tests and for
//! embedders that only consume the live streams.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Minimal filesystem surface: truncating create for the BLOB sink,
/// open-for-read for `get_blob`.
pub trait BlobFs: Send + Sync {
    /// Open `path` for write, creating it and truncating any previous
    /// content. Name collisions overwrite.
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Open `path` for read.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;
}

/// [`BlobFs`] backed by the real filesystem. Paths resolve against the
/// process working directory; no directories are created.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFs;

impl BlobFs for DiskFs {
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// In-memory [`BlobFs`]. Clones share the same file table.
#[derive(Clone, Default)]
pub struct MemFs {
    files: Arc<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>>,
}

impl MemFs {
    pub fn new() -> Self {
        MemFs::default()
    }

    /// Pre-populate a file, replacing any previous content.
    pub fn put(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .insert(path.to_string(), Arc::new(Mutex::new(data.to_vec())));
    }

    /// Current content of a file, if it exists.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).map(|buf| buf.lock().clone())
    }
}

struct MemFile {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemFile {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BlobFs for MemFs {
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        self.files.lock().insert(path.to_string(), Arc::clone(&buf));
        Ok(Box::new(MemFile { buf }))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        match self.get(path) {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("open {path}: file does not exist"),
            )
            .into()),
        }
    }
}
