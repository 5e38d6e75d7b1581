#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use fairserve::cache::{FileCache, Handle};

/// The byte pattern test files are filled with, for content assertions.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Create `name` under `dir` holding `len` patterned bytes.
pub fn file_of_len(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pattern(len)).unwrap();
    path
}

/// A `Write + AsFd` sink backed by an unlinked temporary file, so transfers
/// in tests exercise the same fd paths as a real socket.
pub struct FdSink {
    file: File,
}

impl FdSink {
    pub fn new() -> Self {
        Self {
            file: tempfile::tempfile().unwrap(),
        }
    }

    /// Everything written so far.
    pub fn contents(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0)).unwrap();
        self.file.read_to_end(&mut buf).unwrap();
        buf
    }
}

impl Write for FdSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for FdSink {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// A roomy cache with one open session per requested file size.
///
/// Files are laid out in `dir` as `f0`, `f1`, ... and the handles come back
/// in the same order.
pub fn cache_with_files(dir: &Path, sizes: &[u64]) -> (FileCache, Vec<Handle>) {
    let cache = FileCache::new(1 << 20);
    let handles = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let path = file_of_len(dir, &format!("f{i}"), size as usize);
            cache.open(&path).unwrap()
        })
        .collect();
    (cache, handles)
}
