//! Per-client session state and the blocking transfer paths behind it.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;

/// Backend for one open file session.
#[derive(Debug)]
pub(crate) enum Session {
    /// Reads out of a resident page, looked up by inode on every transfer
    /// so eviction and table growth never invalidate the session.
    Cached { ino: u64, pos: usize },
    /// Streams straight from disk for files the cache could not admit.
    Uncached { file: File, size: u64, sent: u64 },
}

/// Copy up to `want` bytes of `src` starting at `offset` into `dst`.
///
/// Returns the bytes actually moved, which is less than `want` only when
/// the source runs out early, so a short count signals that the file shrank
/// underneath the session. Interrupted syscalls are retried.
#[cfg(target_os = "linux")]
pub(crate) fn transfer_from_file<W: Write + AsFd>(
    src: &File,
    dst: &mut W,
    offset: u64,
    want: usize,
) -> io::Result<usize> {
    use nix::errno::Errno;
    use nix::sys::sendfile::sendfile;

    // Anything still buffered in front of the fd must land first, or the
    // zero-copy bytes would jump the queue.
    dst.flush()?;
    let mut off: nix::libc::off_t = offset
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset exceeds off_t"))?;
    let mut total = 0;
    while total < want {
        match sendfile(dst.as_fd(), src.as_fd(), Some(&mut off), want - total) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(Errno::EINTR) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(total)
}

/// Positional-read fallback for platforms without `sendfile` to a socket.
#[cfg(not(target_os = "linux"))]
pub(crate) fn transfer_from_file<W: Write + AsFd>(
    src: &File,
    dst: &mut W,
    offset: u64,
    want: usize,
) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    const CHUNK: usize = 64 * 1024;

    dst.flush()?;
    let mut buf = vec![0u8; want.min(CHUNK)];
    let mut total = 0;
    while total < want {
        let len = buf.len().min(want - total);
        match src.read_at(&mut buf[..len], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => {
                dst.write_all(&buf[..n])?;
                total += n;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}
