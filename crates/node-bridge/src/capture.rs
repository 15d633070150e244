//! Capture of the process's text output into discrete log lines.
//!
//! The native node writes straight to fd 1/2, outside anything tracing can
//! see, so capture happens at the file-descriptor level: both descriptors are
//! pointed at a pipe and a reader thread turns the pipe into lines.
//!
//! Lines cross from the reader thread into the async broadcast context
//! through a [`LineSink`], an unbounded channel.

use crate::error::CaptureError;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

/// Longest line the reader assembles; longer runs are relayed in pieces.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Create the channel between line producers and the broadcast hub.
pub fn line_channel() -> (LineSink, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LineSink { tx }, rx)
}

/// Producer side of the relay channel.
#[derive(Clone, Debug)]
pub struct LineSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LineSink {
    /// Trim and publish one line. Blank lines are dropped.
    ///
    /// Returns false once the receiving side is gone.
    pub fn publish(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(line.to_string()).is_ok()
    }

    /// Decode raw bytes (invalid UTF-8 becomes U+FFFD) and publish them.
    pub fn publish_bytes(&self, bytes: &[u8]) -> bool {
        self.publish(&String::from_utf8_lossy(bytes))
    }
}

/// Spawn the thread that reads `reader` line by line into `sink`.
///
/// Raw bytes are copied to `echo` as well when one is given. Output with no
/// newline for [`MAX_LINE_LEN`] bytes is published as a partial line. The
/// thread ends at end of stream, on a read error, or when the sink is closed.
pub fn spawn_reader<R>(
    reader: R,
    sink: LineSink,
    mut echo: Option<Box<dyn Write + Send>>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("log-relay".into())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::with_capacity(256);

            loop {
                buf.clear();
                let mut limited = (&mut reader).take(MAX_LINE_LEN as u64);
                match limited.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(out) = echo.as_mut() {
                            // Terminal gone is not a reason to stop relaying
                            if out.write_all(&buf).and_then(|_| out.flush()).is_err() {
                                echo = None;
                            }
                        }
                        if !sink.publish_bytes(&buf) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
}

/// Active redirection of stdout and stderr into the relay.
#[cfg(unix)]
pub struct LogCapture {
    saved_stdout: std::os::fd::OwnedFd,
    saved_stderr: std::os::fd::OwnedFd,
    reader: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl LogCapture {
    /// Redirect fd 1 and fd 2 into a pipe read by a relay thread.
    ///
    /// With `echo`, captured bytes are also written to the original stdout.
    pub fn install(sink: LineSink, echo: bool) -> Result<Self, CaptureError> {
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

        // Rust's stdout is line buffered; push anything pending to the
        // terminal before it starts pointing at the pipe.
        let _ = io::stdout().flush();

        let mut fds = [0; 2];
        // SAFETY: `fds` is a valid two-element array for pipe(2) to fill.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(CaptureError::Pipe(io::Error::last_os_error()));
        }
        // SAFETY: pipe(2) succeeded, so both descriptors are open and ours.
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        let saved_stdout = dup_fd(libc::STDOUT_FILENO)?;
        let saved_stderr = dup_fd(libc::STDERR_FILENO)?;

        redirect(write_end.as_raw_fd(), libc::STDOUT_FILENO)?;
        if let Err(e) = redirect(write_end.as_raw_fd(), libc::STDERR_FILENO) {
            let _ = redirect(saved_stdout.as_raw_fd(), libc::STDOUT_FILENO);
            return Err(e);
        }
        // fd 1 and 2 now hold the write end; the original can close
        drop(write_end);

        // From here on, an error return restores stdio through Drop
        let mut capture = Self {
            saved_stdout,
            saved_stderr,
            reader: None,
        };

        let echo: Option<Box<dyn Write + Send>> = if echo {
            let out = capture.saved_stdout.try_clone().map_err(CaptureError::Spawn)?;
            Some(Box::new(std::fs::File::from(out)))
        } else {
            None
        };

        let reader = spawn_reader(std::fs::File::from(read_end), sink, echo)
            .map_err(CaptureError::Spawn)?;
        capture.reader = Some(reader);

        Ok(capture)
    }

    /// Point fd 1 and fd 2 back at their original targets.
    ///
    /// Closes the last write end of the pipe, so the relay thread sees end of
    /// stream once it has drained what was already written. Dropping the
    /// capture does the same.
    pub fn restore(self) {
        drop(self);
    }
}

#[cfg(unix)]
impl Drop for LogCapture {
    fn drop(&mut self) {
        use std::os::fd::AsRawFd;

        let _ = io::stdout().flush();
        let _ = redirect(self.saved_stdout.as_raw_fd(), libc::STDOUT_FILENO);
        let _ = redirect(self.saved_stderr.as_raw_fd(), libc::STDERR_FILENO);

        // Detach: the relay thread exits on its own after draining
        self.reader.take();
    }
}

#[cfg(unix)]
fn dup_fd(fd: std::os::fd::RawFd) -> Result<std::os::fd::OwnedFd, CaptureError> {
    use std::os::fd::FromRawFd;

    // SAFETY: dup(2) on a standard descriptor; the result is checked below.
    let copy = unsafe { libc::dup(fd) };
    if copy < 0 {
        return Err(CaptureError::Redirect {
            fd,
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: dup(2) returned a fresh descriptor we now own.
    Ok(unsafe { std::os::fd::OwnedFd::from_raw_fd(copy) })
}

#[cfg(unix)]
fn redirect(from: std::os::fd::RawFd, to: std::os::fd::RawFd) -> Result<(), CaptureError> {
    loop {
        // SAFETY: both are open descriptors owned by this process.
        if unsafe { libc::dup2(from, to) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(CaptureError::Redirect { fd: to, source: err });
        }
    }
}

/// Placeholder on platforms without fd redirection.
#[cfg(not(unix))]
pub struct LogCapture;

#[cfg(not(unix))]
impl LogCapture {
    pub fn install(_sink: LineSink, _echo: bool) -> Result<Self, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    pub fn restore(self) {}
}

/// [`MakeWriter`] that relays formatted log output line by line.
///
/// Used to relay the bridge's own tracing output when fd capture is off.
/// Partial lines are buffered until their newline arrives.
#[derive(Clone)]
pub struct ChannelWriter {
    sink: LineSink,
    pending: Arc<Mutex<Vec<u8>>>,
}

impl ChannelWriter {
    pub fn new(sink: LineSink) -> Self {
        Self {
            sink,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend_from_slice(buf);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            self.sink.publish_bytes(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ChannelWriter {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
