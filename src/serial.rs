//! Serial GPS receiver access
//!
//! The device is opened read-write, non-blocking and without becoming the
//! controlling terminal, then switched to 8N1 with hardware flow control,
//! canonical input and CR-to-NL translation.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{Result, error::GpsPushError, framer::RawStream};

/// Supported line speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum BaudRate {
    B1200 = 1200,
    B2400 = 2400,
    B4800 = 4800,
    #[default]
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B57600 = 57600,
    B115200 = 115200,
    B230400 = 230400,
}

impl BaudRate {
    pub fn bits_per_second(self) -> u32 {
        self as u32
    }

    fn to_termios(self) -> termios::BaudRate {
        match self {
            BaudRate::B1200 => termios::BaudRate::B1200,
            BaudRate::B2400 => termios::BaudRate::B2400,
            BaudRate::B4800 => termios::BaudRate::B4800,
            BaudRate::B9600 => termios::BaudRate::B9600,
            BaudRate::B19200 => termios::BaudRate::B19200,
            BaudRate::B38400 => termios::BaudRate::B38400,
            BaudRate::B57600 => termios::BaudRate::B57600,
            BaudRate::B115200 => termios::BaudRate::B115200,
            BaudRate::B230400 => termios::BaudRate::B230400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = GpsPushError;

    fn try_from(value: u32) -> Result<Self> {
        let rate = match value {
            1200 => BaudRate::B1200,
            2400 => BaudRate::B2400,
            4800 => BaudRate::B4800,
            9600 => BaudRate::B9600,
            19200 => BaudRate::B19200,
            38400 => BaudRate::B38400,
            57600 => BaudRate::B57600,
            115200 => BaudRate::B115200,
            230400 => BaudRate::B230400,
            other => {
                return Err(GpsPushError::ConfigError(format!(
                    "unsupported baud rate {other}"
                )));
            }
        };
        Ok(rate)
    }
}

impl std::str::FromStr for BaudRate {
    type Err = GpsPushError;

    fn from_str(s: &str) -> Result<Self> {
        let value: u32 = s
            .parse()
            .map_err(|_| GpsPushError::ConfigError(format!("invalid baud rate {s:?}")))?;
        BaudRate::try_from(value)
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits_per_second())
    }
}

/// Blocks until `fd` is readable or hung up, retrying on EINTR
pub(crate) fn wait_readable<Fd: AsFd>(fd: Fd) -> std::io::Result<PollFlags> {
    loop {
        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        match nix::poll::poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => return Ok(fds[0].revents().unwrap_or(PollFlags::empty())),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// An open, configured serial device
#[derive(Debug)]
pub struct SerialPort {
    path: PathBuf,
    file: File,
}

impl SerialPort {
    /// Opens and configures the receiver's tty
    ///
    /// # Arguments
    /// * `path` - Device node, e.g. `/dev/ttyAMA0`
    /// * `baud` - Line speed, applied to input and output
    ///
    /// # Errors
    /// [`GpsPushError::DeviceError`] if the device cannot be opened and
    /// [`GpsPushError::TermiosError`] if it cannot be configured
    pub fn open<P: AsRef<Path>>(path: P, baud: BaudRate) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(&path)
            .map_err(|source| GpsPushError::DeviceError {
                path: path.clone(),
                source,
            })?;

        configure(&file, baud)?;
        tracing::info!(device = %path.display(), %baud, "serial device opened");

        Ok(SerialPort { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn configure(file: &File, baud: BaudRate) -> Result<()> {
    let mut tty = termios::tcgetattr(file).map_err(GpsPushError::TermiosError)?;

    tty.control_flags = ControlFlags::CRTSCTS
        | ControlFlags::CS8
        | ControlFlags::CLOCAL
        | ControlFlags::CREAD;
    tty.input_flags = InputFlags::IGNPAR | InputFlags::ICRNL;
    tty.local_flags = LocalFlags::ICANON;
    tty.output_flags = OutputFlags::empty();
    tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tty.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::cfsetspeed(&mut tty, baud.to_termios()).map_err(GpsPushError::TermiosError)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &tty).map_err(GpsPushError::TermiosError)
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl RawStream for SerialPort {
    fn wait_readable(&mut self) -> std::io::Result<()> {
        wait_readable(&self.file).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_parsing() {
        assert_eq!("9600".parse::<BaudRate>().unwrap(), BaudRate::B9600);
        assert_eq!(BaudRate::try_from(115200).unwrap(), BaudRate::B115200);
        assert!("9601".parse::<BaudRate>().is_err());
        assert!("fast".parse::<BaudRate>().is_err());
        assert_eq!(BaudRate::default().bits_per_second(), 9600);
    }

    #[test]
    fn test_baud_rate_serde_repr() {
        let rate: BaudRate = serde_json::from_str("4800").unwrap();
        assert_eq!(rate, BaudRate::B4800);
        assert_eq!(serde_json::to_string(&BaudRate::B38400).unwrap(), "38400");
        assert!(serde_json::from_str::<BaudRate>("1234").is_err());
    }

    #[test]
    fn test_missing_device_is_fatal() {
        let err = SerialPort::open("/dev/does-not-exist-gps", BaudRate::B9600).unwrap_err();
        assert!(matches!(err, GpsPushError::DeviceError { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = SerialPort::open(file.path(), BaudRate::B9600).unwrap_err();
        assert!(matches!(err, GpsPushError::TermiosError(_)));
    }
}
