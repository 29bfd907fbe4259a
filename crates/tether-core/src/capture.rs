//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! Output capture: redirects a stream's descriptor through a pty or pipe
//! and reassembles line-oriented output for a callback, while keeping a
//! duplicate of the original descriptor available for real writes.

use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::ptr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tether_common::CaptureConfig;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Per-line callback. Receives each complete line (terminator included)
/// plus a writer over the duplicated original descriptor, so the callback
/// can still perform the "real" write if desired.
pub type LineCallback = Box<dyn FnMut(&str, &mut File) + Send>;

/// A writable stream whose underlying descriptor may be intercepted.
pub trait Capturable: Write {
    /// The raw descriptor behind the stream, when it has one.
    fn descriptor(&self) -> Option<RawFd>;

    /// Flush handle usable after the capture session detaches from the
    /// stream borrow. Streams without user-space buffering keep the no-op
    /// default.
    fn flusher(&self) -> Box<dyn FnMut() -> io::Result<()> + Send> {
        Box::new(|| Ok(()))
    }
}

impl Capturable for io::Stdout {
    fn descriptor(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }

    fn flusher(&self) -> Box<dyn FnMut() -> io::Result<()> + Send> {
        Box::new(|| io::stdout().flush())
    }
}

impl Capturable for io::Stderr {
    fn descriptor(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }

    fn flusher(&self) -> Box<dyn FnMut() -> io::Result<()> + Send> {
        Box::new(|| io::stderr().flush())
    }
}

impl Capturable for File {
    fn descriptor(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

/// In-memory sink without descriptor access; captured as a no-op.
impl Capturable for Vec<u8> {
    fn descriptor(&self) -> Option<RawFd> {
        None
    }
}

/// Whether real capture is possible for this stream. Callers should fall
/// back to the null (pass-through) session when this returns false.
pub fn can_capture<S: Capturable>(stream: &S) -> bool {
    stream.descriptor().is_some()
}

/// Scoped capture session. While alive, every byte written to the stream's
/// descriptor is intercepted and delivered to the callback as complete
/// lines. Dropping the session restores the descriptor; prefer
/// [`CaptureSession::close`] to surface worker errors.
pub struct CaptureSession {
    active: Option<ActiveCapture>,
    flush: Box<dyn FnMut() -> io::Result<()> + Send>,
}

struct ActiveCapture {
    target_fd: RawFd,
    saved_fd: RawFd,
    read_fd: RawFd,
    write_fd: RawFd,
    worker: thread::JoinHandle<io::Result<()>>,
    done_rx: mpsc::Receiver<()>,
    drain_timeout: Duration,
}

impl CaptureSession {
    /// Intercept writes on a stream, typically stdout or stderr.
    ///
    /// Returns a null (pass-through) session when the stream has no
    /// descriptor; use [`can_capture`] to distinguish beforehand.
    pub fn start<S: Capturable>(
        stream: &mut S,
        callback: LineCallback,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let flush = stream.flusher();
        let Some(target_fd) = stream.descriptor() else {
            debug!("stream has no raw descriptor; output capture disabled");
            return Ok(Self {
                active: None,
                flush,
            });
        };
        // Anything buffered before the redirect keeps its original
        // destination.
        stream.flush()?;
        let active = ActiveCapture::install(target_fd, callback, config)?;
        Ok(Self {
            active: Some(active),
            flush,
        })
    }

    /// Whether this session actually intercepts writes.
    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Tear the session down, restoring the original descriptor and
    /// draining the worker.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        // Push any user-space buffered writes through the pipe before the
        // write end goes away.
        let flush_result = (self.flush)();
        let restore_result = active.restore();
        flush_result?;
        restore_result
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(err) = self.teardown() {
                warn!(error = %err, "output capture teardown failed");
            }
        }
    }
}

impl ActiveCapture {
    fn install(target_fd: RawFd, callback: LineCallback, config: &CaptureConfig) -> Result<Self> {
        let saved_fd = unsafe { libc::dup(target_fd) };
        if saved_fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let interactive = unsafe { libc::isatty(target_fd) } == 1;
        let pair = if interactive {
            open_pty_pair()
        } else {
            // Lower-fidelity fallback: no terminal emulation, so e.g.
            // carriage-return insertion will not occur.
            open_pipe_pair()
        };
        let (read_fd, write_fd) = match pair {
            Ok(pair) => pair,
            Err(err) => {
                unsafe { libc::close(saved_fd) };
                return Err(Error::Io(err));
            }
        };

        if unsafe { libc::dup2(write_fd, target_fd) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
                libc::close(saved_fd);
            }
            return Err(Error::Io(err));
        }

        // The worker writes through the duplicate but never owns it; the
        // teardown path closes it once the descriptor is restored.
        let writer = ManuallyDrop::new(unsafe { File::from_raw_fd(saved_fd) });
        let chunk_size = config.chunk_size;
        let (done_tx, done_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("tether-capture".to_owned())
            .spawn(move || {
                let result = capture_worker(read_fd, chunk_size, callback, writer);
                let _ = done_tx.send(());
                result
            })
            .map_err(Error::Io)?;

        Ok(Self {
            target_fd,
            saved_fd,
            read_fd,
            write_fd,
            worker,
            done_rx,
            drain_timeout: config.drain_timeout,
        })
    }

    fn restore(self) -> Result<()> {
        unsafe {
            // Closing our write end alone is not enough: the redirected
            // target descriptor still references it until dup2 restores it.
            libc::close(self.write_fd);
            libc::dup2(self.saved_fd, self.target_fd);
        }
        let drained = self.done_rx.recv_timeout(self.drain_timeout).is_ok();
        if !drained {
            // Soft failure: the pipe closure guarantees the worker exits
            // eventually, and it still holds the saved descriptor for its
            // final callback, so that descriptor is leaked rather than
            // yanked from under it.
            warn!(
                timeout = ?self.drain_timeout,
                "capture worker did not drain in time; trailing output may be missing"
            );
            unsafe { libc::close(self.read_fd) };
            return Ok(());
        }
        let worker_result = self.worker.join();
        unsafe {
            libc::close(self.saved_fd);
            libc::close(self.read_fd);
        }
        match worker_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Io(err)),
            Err(_) => Err(Error::Io(io::Error::other("capture worker panicked"))),
        }
    }
}

fn open_pty_pair() -> io::Result<(RawFd, RawFd)> {
    let mut primary: libc::c_int = -1;
    let mut replica: libc::c_int = -1;
    let rc = unsafe {
        libc::openpty(
            &mut primary,
            &mut replica,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((primary, replica))
}

fn open_pipe_pair() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn capture_worker(
    read_fd: RawFd,
    chunk_size: usize,
    mut callback: LineCallback,
    mut writer: ManuallyDrop<File>,
) -> io::Result<()> {
    let mut raw = vec![0u8; chunk_size];
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = String::new();

    loop {
        let count =
            unsafe { libc::read(read_fd, raw.as_mut_ptr() as *mut libc::c_void, raw.len()) };
        let chunk: &[u8] = if count < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // Raised on linux when the pty write side is closed.
                Some(libc::EIO) => &[],
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        } else {
            &raw[..count as usize]
        };

        if chunk.is_empty() {
            if !pending.is_empty() {
                buf.push_str(&String::from_utf8_lossy(&pending));
            }
            if !buf.is_empty() {
                callback(&buf, &mut *writer);
            }
            return Ok(());
        }

        pending.extend_from_slice(chunk);
        decode_chunk(&mut pending, &mut buf);
        emit_lines(&mut buf, &mut callback, &mut *writer);
    }
}

/// Incrementally decode accumulated bytes, retaining any multi-byte code
/// point split across chunk boundaries for the next read.
fn decode_chunk(pending: &mut Vec<u8>, out: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                out.push_str(valid);
                pending.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                out.push_str(
                    std::str::from_utf8(&pending[..valid_up_to]).expect("validated prefix"),
                );
                match err.error_len() {
                    Some(invalid) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid_up_to + invalid);
                    }
                    None => {
                        // Incomplete tail; completed by the next chunk.
                        pending.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

/// Emit every complete line in the buffer, terminator included, keeping
/// any trailing partial line for the next chunk.
fn emit_lines(buf: &mut String, callback: &mut LineCallback, writer: &mut File) {
    loop {
        let Some(pos) = buf.find(['\r', '\n']) else {
            return;
        };
        let bytes = buf.as_bytes();
        let end = if bytes[pos] == b'\r' && bytes.get(pos + 1) == Some(&b'\n') {
            pos + 2
        } else {
            pos + 1
        };
        callback(&buf[..end], writer);
        buf.drain(..end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn test_config(chunk_size: usize) -> CaptureConfig {
        CaptureConfig {
            drain_timeout: Duration::from_secs(3),
            chunk_size,
        }
    }

    fn collecting_callback() -> (Arc<Mutex<Vec<String>>>, LineCallback) {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: LineCallback = Box::new(move |line, _writer| {
            sink.lock().push(line.to_owned());
        });
        (lines, callback)
    }

    #[test]
    fn reassembles_lines_and_flushes_trailing_partial() {
        let mut stream = tempfile::tempfile().expect("tempfile");
        let (lines, callback) = collecting_callback();

        let session =
            CaptureSession::start(&mut stream, callback, &test_config(512)).expect("capture");
        assert!(session.is_capturing());
        stream.write_all(b"abc\ndef\r\nghi").expect("write");
        // Closing the session forces end-of-stream, flushing the tail.
        session.close().expect("close");

        assert_eq!(*lines.lock(), vec!["abc\n", "def\r\n", "ghi"]);
    }

    #[test]
    fn survives_code_point_split_across_chunks() {
        let mut stream = tempfile::tempfile().expect("tempfile");
        let (lines, callback) = collecting_callback();

        // chunk_size 4 splits the two-byte é of "abcé\n" across reads.
        let session =
            CaptureSession::start(&mut stream, callback, &test_config(4)).expect("capture");
        stream
            .write_all("abc\u{e9}\nxyz\n".as_bytes())
            .expect("write");
        session.close().expect("close");

        assert_eq!(*lines.lock(), vec!["abc\u{e9}\n", "xyz\n"]);
    }

    #[test]
    fn callback_can_write_to_the_real_descriptor() {
        let mut stream = tempfile::tempfile().expect("tempfile");
        let echoed: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let counter = echoed.clone();
        let callback: LineCallback = Box::new(move |line, writer| {
            writer.write_all(line.as_bytes()).expect("real write");
            *counter.lock() += 1;
        });

        let session =
            CaptureSession::start(&mut stream, callback, &test_config(512)).expect("capture");
        stream.write_all(b"one\ntwo\n").expect("write");
        session.close().expect("close");

        assert_eq!(*echoed.lock(), 2);

        // The real writes landed in the original file, not the pipe.
        use std::io::{Read, Seek, SeekFrom};
        let mut contents = String::new();
        stream.seek(SeekFrom::Start(0)).expect("seek");
        stream.read_to_string(&mut contents).expect("read");
        assert_eq!(contents, "one\ntwo\n");
    }

    #[test]
    fn null_capture_passes_writes_through() {
        let mut sink: Vec<u8> = Vec::new();
        assert!(!can_capture(&sink));
        let (lines, callback) = collecting_callback();

        let session =
            CaptureSession::start(&mut sink, callback, &test_config(512)).expect("capture");
        assert!(!session.is_capturing());
        sink.write_all(b"untouched\n").expect("write");
        session.close().expect("close");

        assert!(lines.lock().is_empty());
        assert_eq!(sink, b"untouched\n");
    }
}
