//! Named-pipe relay between the capture and the delivery process
//!
//! The capture side ([`RelayWriter`]) creates the FIFO and writes sentences
//! into it whenever a reader is attached, without ever blocking on it. The
//! delivery side ([`RelayReader`]) holds the read end and feeds it to a
//! [`LineFramer`](crate::framer::LineFramer) like any other raw stream.
//! Either process can be restarted without taking the other one down.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag};
use nix::poll::PollFlags;
use nix::sys::stat::Mode;

use crate::{
    Result,
    error::GpsPushError,
    framer::{Line, RawStream},
    serial::wait_readable,
    storage::append_line,
};

/// Default FIFO location
pub const DEFAULT_RELAY_PATH: &str = "/tmp/gps.pipe";

/// Kernel buffer requested for the FIFO once a reader is attached
pub const DEFAULT_PIPE_SIZE: usize = 1024 * 1024;

/// Makes writes to a vanished reader fail with `EPIPE` instead of killing
/// the process
pub fn ignore_broken_pipe() -> Result<()> {
    use nix::sys::signal::{SigHandler, Signal, signal};

    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(|e| GpsPushError::ConfigError(format!("ignoring SIGPIPE: {e}")))
}

/// Capture side of the relay
#[derive(Debug)]
pub struct RelayWriter {
    path: PathBuf,
    file: Option<File>,
    pipe_size: Option<usize>,
}

impl RelayWriter {
    /// Creates the FIFO at `path`
    ///
    /// Fails if anything already exists there, typically a pipe left behind
    /// by an unclean shutdown.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o644)).map_err(|e| {
            GpsPushError::RelayError {
                path: path.clone(),
                source: e.into(),
            }
        })?;

        tracing::info!(path = %path.display(), "relay fifo created");
        Ok(Self::attach(path))
    }

    /// Uses an existing FIFO without creating it
    pub fn attach<P: AsRef<Path>>(path: P) -> Self {
        RelayWriter {
            path: path.as_ref().to_path_buf(),
            file: None,
            pipe_size: Some(DEFAULT_PIPE_SIZE),
        }
    }

    /// Pipe capacity to request when the write end opens, `None` keeps the
    /// kernel default
    pub fn pipe_size(mut self, size: Option<usize>) -> Self {
        self.pipe_size = size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the write end is currently open
    pub fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    /// Appends `line` and a terminator to the pipe
    ///
    /// Returns [`GpsPushError::NoReader`] while no process holds the read end;
    /// the open is attempted again on the next call. A reader that went away
    /// surfaces as [`GpsPushError::RelayWriteError`] and the write end is
    /// closed so the next call reconnects.
    pub fn write_line(&mut self, line: &Line<'_>) -> Result<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => self.open()?,
        };

        match append_line(&mut file, line) {
            Ok(()) => {
                self.file = Some(file);
                Ok(())
            }
            Err(e) => {
                if e.kind() == ErrorKind::BrokenPipe {
                    tracing::warn!(path = %self.path.display(), "relay reader went away");
                } else {
                    self.file = Some(file);
                }
                Err(GpsPushError::RelayWriteError(e))
            }
        }
    }

    fn open(&self) -> Result<File> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)
            .map_err(|source| {
                if source.raw_os_error() == Some(Errno::ENXIO as i32) {
                    GpsPushError::NoReader(self.path.clone())
                } else {
                    GpsPushError::RelayError {
                        path: self.path.clone(),
                        source,
                    }
                }
            })?;

        if let Some(size) = self.pipe_size {
            let requested = i32::try_from(size).unwrap_or(i32::MAX);
            if let Err(e) = nix::fcntl::fcntl(file.as_raw_fd(), FcntlArg::F_SETPIPE_SZ(requested)) {
                tracing::warn!(size, error = %e, "cannot resize relay pipe, keeping default");
            }
        }

        tracing::info!(path = %self.path.display(), "relay pipe opened");
        Ok(file)
    }
}

/// Delivery side of the relay
#[derive(Debug)]
pub struct RelayReader {
    path: PathBuf,
    file: File,
}

impl RelayReader {
    /// Opens the read end, blocking until a writer shows up
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| GpsPushError::RelayError {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), "relay opened for reading");
        Ok(RelayReader { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for RelayReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl RawStream for RelayReader {
    /// Waits for data; once the writer has hung up and everything is drained,
    /// re-opens the FIFO and waits for the next writer
    fn wait_readable(&mut self) -> std::io::Result<()> {
        loop {
            let revents = wait_readable(&self.file)?;
            if revents.contains(PollFlags::POLLIN) {
                return Ok(());
            }
            if revents.contains(PollFlags::POLLNVAL) {
                return Err(std::io::Error::from_raw_os_error(Errno::EBADF as i32));
            }
            if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                tracing::info!(path = %self.path.display(), "relay writer hung up, waiting for a new one");
                self.file = File::open(&self.path)?;
                continue;
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::os::unix::fs::FileTypeExt;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::framer::LineFramer;

    /// Writes `line` as soon as a reader holds the other end
    pub(crate) fn write_when_read(writer: &mut RelayWriter, line: &Line<'_>) {
        let mut attempts = 0;
        loop {
            match writer.write_line(line) {
                Ok(()) => return,
                Err(GpsPushError::NoReader(_)) if attempts < 500 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("relay write failed: {e}"),
            }
        }
    }

    fn nonblocking_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_create_makes_a_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");

        let writer = RelayWriter::create(&path).unwrap();
        assert!(!writer.is_connected());
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[test]
    fn test_create_over_stale_pipe_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");

        RelayWriter::create(&path).unwrap();
        let err = RelayWriter::create(&path).unwrap_err();
        assert!(matches!(err, GpsPushError::RelayError { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_write_without_reader_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");
        let mut writer = RelayWriter::create(&path).unwrap();

        let err = writer.write_line(&Line::new(b"$GPGGA,1")).unwrap_err();
        assert!(matches!(err, GpsPushError::NoReader(_)));
        assert!(!err.is_fatal());
        assert!(!writer.is_connected());

        // still usable once a reader shows up
        let mut reader = nonblocking_reader(&path);
        writer.write_line(&Line::new(b"$GPRMC,2")).unwrap();
        assert!(writer.is_connected());

        let mut received = [0u8; 64];
        let n = reader.read(&mut received).unwrap();
        assert_eq!(&received[..n], b"$GPRMC,2\n");
    }

    #[test]
    fn test_reader_gone_reconnects_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");
        let mut writer = RelayWriter::create(&path).unwrap().pipe_size(None);

        let reader = nonblocking_reader(&path);
        writer.write_line(&Line::new(b"$GPGGA,1")).unwrap();
        drop(reader);

        let err = writer.write_line(&Line::new(b"$GPGGA,2")).unwrap_err();
        assert!(matches!(err, GpsPushError::RelayWriteError(ref e) if e.kind() == ErrorKind::BrokenPipe));
        assert!(!writer.is_connected());

        let err = writer.write_line(&Line::new(b"$GPGGA,3")).unwrap_err();
        assert!(matches!(err, GpsPushError::NoReader(_)));
    }

    #[test]
    fn test_lines_reach_a_framed_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");
        let mut writer = RelayWriter::create(&path).unwrap();

        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let mut framer = LineFramer::new(RelayReader::open(&reader_path).unwrap());
            let first = framer.read_line().unwrap().to_string();
            let second = framer.read_line().unwrap().to_string();
            (first, second)
        });

        write_when_read(&mut writer, &Line::new(b"$GPGGA,1"));
        writer.write_line(&Line::new(b"$GPRMC,2")).unwrap();

        let (first, second) = reader.join().unwrap();
        assert_eq!(first, "$GPGGA,1");
        assert_eq!(second, "$GPRMC,2");
    }

    #[test]
    fn test_reader_picks_up_restarted_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");
        RelayWriter::create(&path).unwrap();

        let (seen, first_seen) = mpsc::channel();
        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let mut framer = LineFramer::new(RelayReader::open(&reader_path).unwrap());
            let first = framer.read_line().unwrap().to_string();
            seen.send(()).unwrap();
            let second = framer.read_line().unwrap().to_string();
            (first, second)
        });

        let mut gateway = RelayWriter::attach(&path).pipe_size(None);
        write_when_read(&mut gateway, &Line::new(b"$GPGGA,1"));
        first_seen.recv().unwrap();
        drop(gateway);

        // give the reader time to see the hangup and wait for a new writer
        std::thread::sleep(Duration::from_millis(50));

        let mut restarted = RelayWriter::attach(&path).pipe_size(None);
        write_when_read(&mut restarted, &Line::new(b"$GPRMC,2"));

        let (first, second) = reader.join().unwrap();
        assert_eq!(first, "$GPGGA,1");
        assert_eq!(second, "$GPRMC,2");
    }
}
