#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{FdSink, file_of_len, pattern};
use fairserve::cache::FileCache;

#[test]
fn cached_sends_chunk_until_eof() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_of_len(dir.path(), "f", 11);
    let cache = FileCache::new(1024);
    let handle = cache.open(&path).unwrap();

    let mut sink = FdSink::new();
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 4);
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 4);
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 3, "short final chunk");
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 0);
    assert_eq!(sink.contents(), pattern(11));
}

#[test]
fn uncached_sessions_stream_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_of_len(dir.path(), "f", 11);
    // A zero-byte budget caches nothing at all.
    let cache = FileCache::new(0);
    let handle = cache.open(&path).unwrap();
    assert_eq!(cache.stats().pages, 0);

    let mut sink = FdSink::new();
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 4);
    assert_eq!(cache.send(handle, &mut sink, 100).unwrap(), 7);
    assert_eq!(cache.send(handle, &mut sink, 4).unwrap(), 0);
    assert_eq!(sink.contents(), pattern(11));
}

#[test]
fn sessions_keep_independent_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_of_len(dir.path(), "f", 10);
    let cache = FileCache::new(1024);
    let h1 = cache.open(&path).unwrap();
    let h2 = cache.open(&path).unwrap();

    let mut s1 = FdSink::new();
    let mut s2 = FdSink::new();
    assert_eq!(cache.send(h1, &mut s1, 7).unwrap(), 7);
    assert_eq!(cache.send(h2, &mut s2, 3).unwrap(), 3);
    assert_eq!(cache.send(h1, &mut s1, 7).unwrap(), 3);
    assert_eq!(cache.send(h2, &mut s2, 7).unwrap(), 7);

    assert_eq!(s1.contents(), pattern(10));
    assert_eq!(s2.contents(), pattern(10));
}

#[test]
fn handles_stay_valid_as_the_table_grows() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_of_len(dir.path(), "f", 8);
    let cache = FileCache::new(1024);

    // Push well past the initial slot count.
    let handles: Vec<_> = (0..20).map(|_| cache.open(&path).unwrap()).collect();
    for (i, &handle) in handles.iter().enumerate() {
        assert_eq!(
            cache.filesize(handle).unwrap(),
            8,
            "handle {i} must survive table growth"
        );
    }

    // Freeing and reopening reuses the lowest freed slot.
    cache.close(handles[3]).unwrap();
    cache.close(handles[11]).unwrap();
    let reused = cache.open(&path).unwrap();
    assert_eq!(reused, handles[3], "the lowest freed slot is reissued");
}

#[test]
fn zero_length_files_serve_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_of_len(dir.path(), "empty", 0);
    let cache = FileCache::new(1024);
    let handle = cache.open(&path).unwrap();

    assert_eq!(cache.filesize(handle).unwrap(), 0);
    let mut sink = FdSink::new();
    assert_eq!(cache.send(handle, &mut sink, 64).unwrap(), 0);
    assert_eq!(cache.stats().pages, 1, "empty files still get a page");
    cache.close(handle).unwrap();
}
