//! Linux i2c-dev transport.
//!
//! Talks to `/dev/i2c-N` character devices. Each message goes out as its
//! own `I2C_RDWR` ioctl so that the adapter generates a STOP after it.
//! Exclusive access is an advisory `flock(LOCK_EX | LOCK_NB)` held for the
//! lifetime of a [`LinuxI2c`].

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::hw_trait::{BusProvider, I2c, I2cError};

/// Directory holding the i2c-dev nodes on a stock system.
pub const DEFAULT_DEV_DIR: &str = "/dev";

// linux/i2c-dev.h
const I2C_RDWR: u32 = 0x0707;
// linux/i2c.h
const I2C_M_RD: u16 = 0x0001;

/// `struct i2c_msg`
#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

/// `struct i2c_rdwr_ioctl_data`
#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

nix::ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrIoctlData);

/// Open, locked i2c-dev node.
pub struct LinuxI2c {
    path: PathBuf,
    file: Option<Flock<File>>,
}

impl LinuxI2c {
    /// Open `path` read-write and take the exclusive lock without blocking.
    ///
    /// If the lock is held by someone else the freshly opened descriptor is
    /// closed again and [`Error::Busy`] is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;

        // On failure `Flock::lock` hands the file back; dropping it closes
        // the descriptor.
        let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_file, errno)) if errno == Errno::EWOULDBLOCK => {
                debug!("{} is locked by another user", path.display());
                return Err(Error::Busy { path });
            }
            Err((_file, errno)) => {
                return Err(Error::Lock {
                    path,
                    source: errno,
                })
            }
        };

        trace!("Opened and locked {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Path of the device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock and close the bus.
    ///
    /// Dropping the handle does the same; this only makes the release point
    /// explicit. Failures to unlock are logged, not returned.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(locked) = self.file.take() else {
            return;
        };

        match locked.unlock() {
            Ok(file) => drop(file),
            // Dropping the returned guard closes the descriptor, which
            // releases the lock regardless.
            Err((_locked, errno)) => {
                debug!("Unlocking {} failed: {}", self.path.display(), errno)
            }
        }
        trace!("Closed {}", self.path.display());
    }

    fn fd(&self) -> std::result::Result<RawFd, I2cError> {
        self.file
            .as_ref()
            .map(|file| file.as_raw_fd())
            .ok_or_else(|| I2cError::Other("bus already closed".into()))
    }

    fn transfer(&mut self, msg: &mut I2cMsg) -> std::result::Result<(), I2cError> {
        let fd = self.fd()?;
        let data = I2cRdwrIoctlData {
            msgs: msg,
            nmsgs: 1,
        };

        // SAFETY: `data` points at exactly one message whose buffer is
        // valid for `len` bytes for the duration of the call.
        match unsafe { i2c_rdwr(fd, &data) } {
            Ok(_) => Ok(()),
            Err(Errno::ENXIO) | Err(Errno::EREMOTEIO) => Err(I2cError::NoAck(msg.addr)),
            Err(errno) => Err(I2cError::Io(errno)),
        }
    }
}

impl Drop for LinuxI2c {
    fn drop(&mut self) {
        self.release();
    }
}

fn msg_len(len: usize) -> std::result::Result<u16, I2cError> {
    u16::try_from(len)
        .map_err(|_| I2cError::Other(format!("message of {len} bytes is too long")))
}

impl I2c for LinuxI2c {
    fn write(&mut self, addr: u16, data: &[u8]) -> std::result::Result<(), I2cError> {
        trace!("i2c write 0x{:02x}: {:02x?}", addr, data);
        let mut msg = I2cMsg {
            addr,
            flags: 0,
            len: msg_len(data.len())?,
            // The kernel only reads from buffers of write messages.
            buf: data.as_ptr() as *mut u8,
        };
        self.transfer(&mut msg)
    }

    fn read(&mut self, addr: u16, buffer: &mut [u8]) -> std::result::Result<(), I2cError> {
        let mut msg = I2cMsg {
            addr,
            flags: I2C_M_RD,
            len: msg_len(buffer.len())?,
            buf: buffer.as_mut_ptr(),
        };
        self.transfer(&mut msg)?;
        trace!("i2c read 0x{:02x}: {:02x?}", addr, buffer);
        Ok(())
    }
}

/// Opens numbered buses below a device directory.
#[derive(Debug, Clone)]
pub struct LinuxI2cProvider {
    dev_dir: PathBuf,
}

impl LinuxI2cProvider {
    /// Provider for the nodes in [`DEFAULT_DEV_DIR`].
    pub fn new() -> Self {
        Self::with_dev_dir(DEFAULT_DEV_DIR)
    }

    /// Provider for `i2c-N` nodes in a different directory.
    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    /// Device node for bus number `bus`.
    pub fn device_path(&self, bus: u8) -> PathBuf {
        self.dev_dir.join(format!("i2c-{bus}"))
    }
}

impl Default for LinuxI2cProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BusProvider for LinuxI2cProvider {
    type Bus = LinuxI2c;

    fn open(&self, bus: u8) -> Result<LinuxI2c> {
        LinuxI2c::open(self.device_path(bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    // A regular file stands in for the device node: flock works on it,
    // the I2C ioctl does not.
    fn fake_dev_dir() -> (TempDir, LinuxI2cProvider) {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("i2c-1")).unwrap();
        let provider = LinuxI2cProvider::with_dev_dir(dir.path());
        (dir, provider)
    }

    #[test]
    fn test_device_path() {
        assert_eq!(
            LinuxI2cProvider::new().device_path(1),
            PathBuf::from("/dev/i2c-1")
        );
    }

    #[test]
    fn test_open_missing_device() {
        let (_dir, provider) = fake_dev_dir();
        match provider.open(7) {
            Err(err @ Error::Open { .. }) => assert_eq!(err.kind(), ErrorKind::BusUnavailable),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a missing device"),
        }
    }

    #[test]
    fn test_second_open_fails_fast_while_locked() {
        let (_dir, provider) = fake_dev_dir();

        let first = provider.open(1).unwrap();
        assert!(matches!(provider.open(1), Err(Error::Busy { .. })));

        drop(first);
        let again = provider.open(1).unwrap();
        assert_eq!(again.path(), provider.device_path(1));
    }

    #[test]
    fn test_explicit_close_releases_lock() {
        let (_dir, provider) = fake_dev_dir();

        provider.open(1).unwrap().close();
        provider.open(1).unwrap().close();
    }

    #[test]
    fn test_transfer_on_non_i2c_node_fails() {
        let (_dir, provider) = fake_dev_dir();
        let mut bus = provider.open(1).unwrap();

        assert_eq!(bus.write(0x43, &[0x00]), Err(I2cError::Io(Errno::ENOTTY)));

        let mut buffer = [0xAA; 2];
        assert_eq!(bus.read(0x43, &mut buffer), Err(I2cError::Io(Errno::ENOTTY)));
    }

    #[test]
    fn test_oversize_message_rejected() {
        assert!(msg_len(u16::MAX as usize).is_ok());
        assert!(matches!(
            msg_len(u16::MAX as usize + 1),
            Err(I2cError::Other(_))
        ));
    }
}
