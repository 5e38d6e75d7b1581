//! Accept loop and scheduler drain workers.
//!
//! One thread accepts and admits connections; a pool of drain workers
//! checks jobs out of the scheduler and moves one quantum per turn. The
//! success header is written during admission, before the job is queued,
//! so workers only ever move body bytes.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use fairserve::cache::{CacheError, FileCache, Handle};
use fairserve::sched::{Rcb, Scheduler};

use crate::app_config::Config;
use crate::http::{self, Status};

/// How long a fresh connection may take to produce its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle workers recheck the queues this often even without a wakeup.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid scheduling policy: {0}")]
    Policy(#[from] fairserve::sched::PolicyParseError),

    #[error("cannot listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
}

/// Wakes drain workers when new work lands in the queues.
#[derive(Default)]
struct WorkSignal {
    lock: Mutex<()>,
    ready: Condvar,
}

impl WorkSignal {
    fn notify(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.ready.notify_one();
    }

    /// Block until notified or until the poll interval lapses.
    fn wait(&self) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        drop(
            self.ready
                .wait_timeout(guard, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

/// Run the server until the process is torn down.
pub fn run(config: &Config) -> Result<(), ServeError> {
    let policy = config.policy()?;
    let listener = TcpListener::bind(config.server.listen).map_err(|source| ServeError::Bind {
        addr: config.server.listen,
        source,
    })?;
    info!(
        listen = %config.server.listen,
        root = %config.server.root.display(),
        %policy,
        workers = config.server.workers,
        cache = %config.cache.max_size,
        "serving"
    );

    let cache = Arc::new(FileCache::new(config.cache.max_size.as_u64()));
    let sched = Arc::new(Scheduler::new(policy, config.tuning()));
    let signal = Arc::new(WorkSignal::default());

    let mut workers = Vec::with_capacity(config.server.workers);
    for i in 0..config.server.workers {
        let cache = Arc::clone(&cache);
        let sched = Arc::clone(&sched);
        let signal = Arc::clone(&signal);
        let worker = thread::Builder::new()
            .name(format!("drain-{i}"))
            .spawn(move || drain_loop(&cache, &sched, &signal))
            .map_err(ServeError::Spawn)?;
        workers.push(worker);
    }

    for stream in listener.incoming() {
        match stream {
            Ok(conn) => {
                admit(&cache, &sched, &config.server.root, conn);
                signal.notify();
            }
            Err(err) => warn!("accept failed: {err}"),
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

/// Parse, resolve and enqueue one connection.
///
/// Every failure answers the client directly and hangs up; only a
/// successfully admitted request reaches the queues.
fn admit(cache: &FileCache, sched: &Scheduler<TcpStream>, root: &Path, conn: TcpStream) {
    if let Err(err) = conn.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!("cannot arm read timeout: {err}");
    }

    let mut reader = BufReader::new(conn);
    let line = match http::read_request_line(&mut reader) {
        Ok(line) => line,
        Err(err) => {
            debug!("client hung up before sending a request: {err}");
            return;
        }
    };
    let mut conn = reader.into_inner();

    let target = match http::parse_request_line(&line) {
        Ok(target) => target,
        Err(err) => {
            debug!(line, "refusing request: {err}");
            respond_error(conn, Status::for_request_error(&err));
            return;
        }
    };

    let Some(path) = http::resolve_target(root, target) else {
        debug!(target, "target does not map under the root");
        respond_error(conn, Status::NotFound);
        return;
    };

    if sched.is_full() {
        respond_error(conn, Status::Unavailable);
        return;
    }

    let handle = match cache.open(&path) {
        Ok(handle) => handle,
        Err(err @ CacheError::NotFound { .. }) => {
            debug!("open failed: {err}");
            respond_error(conn, Status::NotFound);
            return;
        }
        Err(err) => {
            warn!("open failed: {err}");
            respond_error(conn, Status::Unavailable);
            return;
        }
    };

    let size = match cache.filesize(handle) {
        Ok(size) => size,
        Err(err) => {
            warn!(%handle, "size lookup failed: {err}");
            close_session(cache, handle);
            respond_error(conn, Status::Unavailable);
            return;
        }
    };

    // The header goes out before the job is queued: a drain worker may
    // start on the body the moment submit returns.
    if let Err(err) = http::write_ok_header(&mut conn, size) {
        debug!("client went away before the header: {err}");
        close_session(cache, handle);
        return;
    }

    if let Err(refused) = sched.submit(conn, handle, size) {
        // Capacity raced against the check above. The header already
        // promised a body, so hanging up is the only honest answer.
        warn!(handle = %refused.handle, "queue filled up while admitting");
        close_session(cache, refused.handle);
    }
}

/// One scheduling turn: move at most the job's quantum.
fn service(cache: &FileCache, rcb: &mut Rcb<TcpStream>) -> Result<usize, CacheError> {
    let want = rcb.quantum().min(rcb.remaining());
    let want = usize::try_from(want).unwrap_or(usize::MAX);
    let handle = rcb.handle();
    cache.send(handle, rcb.conn_mut(), want)
}

fn drain_loop(cache: &FileCache, sched: &Scheduler<TcpStream>, signal: &WorkSignal) {
    loop {
        let Some(mut rcb) = sched.next_job() else {
            signal.wait();
            continue;
        };
        match service(cache, &mut rcb) {
            Ok(0) if rcb.remaining() > 0 => {
                // No progress with bytes still owed: the file shrank
                // underneath the session.
                sched.abort(cache, rcb);
            }
            Ok(sent) => sched.update(cache, sent as u64, rcb),
            Err(err) => {
                debug!("transfer failed: {err}");
                sched.abort(cache, rcb);
            }
        }
    }
}

/// Answer with an error response; clients that already left are ignored.
fn respond_error(mut conn: TcpStream, status: Status) {
    if let Err(err) = http::write_error(&mut conn, status) {
        debug!("error response not delivered: {err}");
    }
}

fn close_session(cache: &FileCache, handle: Handle) {
    if let Err(err) = cache.close(handle) {
        warn!(%handle, "session close failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairserve::sched::{Policy, Tuning};
    use std::io::{Read, Write as _};

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Run queued jobs to completion on the calling thread.
    fn drain_all(cache: &FileCache, sched: &Scheduler<TcpStream>) {
        while let Some(mut rcb) = sched.next_job() {
            let sent = service(cache, &mut rcb).unwrap();
            sched.update(cache, sent as u64, rcb);
        }
    }

    #[test]
    fn get_is_served_through_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello fairserve").unwrap();

        let cache = FileCache::new(1 << 20);
        let sched = Scheduler::new(Policy::RoundRobin, Tuning::default());

        let (mut client, server) = socket_pair();
        client.write_all(b"GET /hello.txt HTTP/1.0\r\n\r\n").unwrap();
        admit(&cache, &sched, dir.path(), server);
        assert_eq!(sched.len(), 1, "the request should be queued");

        drain_all(&cache, &sched);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("Content-Length: 15\r\n"));
        assert!(response.ends_with("hello fairserve"));
        assert_eq!(
            cache.stats().open_sessions,
            0,
            "retiring the job must close its session"
        );
    }

    #[test]
    fn missing_files_get_404() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(1 << 20);
        let sched = Scheduler::new(Policy::RoundRobin, Tuning::default());

        let (mut client, server) = socket_pair();
        client.write_all(b"GET /absent.txt HTTP/1.0\r\n\r\n").unwrap();
        admit(&cache, &sched, dir.path(), server);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(sched.is_empty(), "nothing should have been admitted");
    }

    #[test]
    fn traversal_is_answered_with_404() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(1 << 20);
        let sched = Scheduler::new(Policy::RoundRobin, Tuning::default());

        let (mut client, server) = socket_pair();
        client
            .write_all(b"GET /../../etc/passwd HTTP/1.0\r\n\r\n")
            .unwrap();
        admit(&cache, &sched, dir.path(), server);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn non_get_methods_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(1 << 20);
        let sched = Scheduler::new(Policy::RoundRobin, Tuning::default());

        let (mut client, server) = socket_pair();
        client.write_all(b"POST /x HTTP/1.0\r\n\r\n").unwrap();
        admit(&cache, &sched, dir.path(), server);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn full_queue_turns_clients_away() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"xx").unwrap();

        let cache = FileCache::new(1 << 20);
        let sched = Scheduler::new(
            Policy::RoundRobin,
            Tuning {
                capacity: Some(1),
                ..Tuning::default()
            },
        );

        let (mut first, server) = socket_pair();
        first.write_all(b"GET /f HTTP/1.0\r\n\r\n").unwrap();
        admit(&cache, &sched, dir.path(), server);
        assert!(sched.is_full());

        let (mut second, server) = socket_pair();
        second.write_all(b"GET /f HTTP/1.0\r\n\r\n").unwrap();
        admit(&cache, &sched, dir.path(), server);

        let mut response = String::new();
        second.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 503 Service Unavailable\r\n"));
        assert_eq!(
            cache.stats().open_sessions,
            1,
            "the refused request must not leak a session"
        );

        drain_all(&cache, &sched);
        let mut response = String::new();
        first.read_to_string(&mut response).unwrap();
        assert!(response.ends_with("xx"), "the admitted request still completes");
    }
}
