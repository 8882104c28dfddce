use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

use super::{AccessMode, BlockAddress, BlockDevice, DeviceError, DeviceIdentity};

/// Sector size assumed for regular files and devices that can't be queried.
const FALLBACK_BLOCK_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub write: bool,
    /// Refuse to open a device that is mounted or held open elsewhere.
    pub exclusive: bool,
    pub direct_io: bool,
}

/// A device node or image file accessed through regular OS syscalls.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: Option<File>,
    block_count: u64,
    logical_block_size: u64,
    physical_block_size: u64,
    mode: AccessMode,
}

fn open_file_options(flags: OpenFlags) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true);
    if flags.write {
        opts.write(true);
    }
    #[cfg(target_os = "linux")]
    {
        let mut custom = 0;
        if flags.exclusive {
            custom |= libc::O_EXCL;
        }
        if flags.direct_io {
            custom |= libc::O_DIRECT;
        }
        opts.custom_flags(custom);
    }
    opts
}

#[cfg(target_os = "macos")]
fn enable_nocache(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    // Readahead must be off before F_NOCACHE takes effect.
    if unsafe { libc::fcntl(fd, libc::F_RDAHEAD, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod ioctl {
    pub const BLKSSZGET: u64 = 0x1268;
    pub const BLKPBSZGET: u64 = 0x127b;
    pub const BLKGETSIZE64: u64 = 0x8008_1272;
}

/// (block count, logical block size, physical block size) of a block device.
#[cfg(target_os = "linux")]
fn block_device_geometry(file: &File) -> io::Result<(u64, u64, u64)> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let mut bytes: u64 = 0;
    let mut logical: libc::c_int = 0;
    let mut physical: libc::c_uint = 0;
    unsafe {
        if libc::ioctl(fd, ioctl::BLKGETSIZE64 as _, &mut bytes) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(fd, ioctl::BLKSSZGET as _, &mut logical) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(fd, ioctl::BLKPBSZGET as _, &mut physical) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    let logical = if logical > 0 { logical as u64 } else { FALLBACK_BLOCK_SIZE };
    let physical = (physical as u64).max(logical);
    Ok((bytes / logical, logical, physical))
}

#[cfg(not(target_os = "linux"))]
fn block_device_geometry(file: &File) -> io::Result<(u64, u64, u64)> {
    let mut f = file;
    let bytes = f.seek(SeekFrom::End(0))?;
    Ok((bytes / FALLBACK_BLOCK_SIZE, FALLBACK_BLOCK_SIZE, FALLBACK_BLOCK_SIZE))
}

#[cfg(unix)]
fn is_block_device(file: &File) -> io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;
    Ok(file.metadata()?.file_type().is_block_device())
}

#[cfg(not(unix))]
fn is_block_device(_file: &File) -> io::Result<bool> {
    Ok(false)
}

impl FileDevice {
    pub fn open<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = open_file_options(flags).open(path)?;

        #[cfg(target_os = "macos")]
        if flags.direct_io {
            enable_nocache(&file)?;
        }

        let (block_count, logical, physical) = if is_block_device(&file)? {
            block_device_geometry(&file)?
        } else {
            let bytes = file.metadata()?.len();
            (bytes / FALLBACK_BLOCK_SIZE, FALLBACK_BLOCK_SIZE, FALLBACK_BLOCK_SIZE)
        };

        Ok(FileDevice {
            path: path.to_path_buf(),
            file: Some(file),
            block_count,
            logical_block_size: logical,
            physical_block_size: physical,
            mode: AccessMode::Os,
        })
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn handle(&mut self) -> Result<&mut File, DeviceError> {
        self.file
            .as_mut()
            .ok_or_else(|| DeviceError::Rejected(format!("{} is closed", self.path.display())))
    }

    fn offset(&self, block: BlockAddress) -> u64 {
        block * self.logical_block_size
    }
}

impl BlockDevice for FileDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn logical_block_count(&self) -> u64 {
        self.block_count
    }

    fn logical_block_size(&self) -> u64 {
        self.logical_block_size
    }

    fn physical_block_size(&self) -> u64 {
        self.physical_block_size
    }

    fn set_access_mode(&mut self, mode: AccessMode) -> Result<(), DeviceError> {
        match mode {
            AccessMode::Os => {
                self.mode = mode;
                Ok(())
            }
            AccessMode::Ata => Err(DeviceError::Unsupported("ATA passthrough")),
        }
    }

    fn read(&mut self, block: BlockAddress, count: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        self.check_request(block, count, buf.len())?;
        let offset = self.offset(block);
        let file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write(&mut self, block: BlockAddress, count: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        self.check_request(block, count, buf.len())?;
        let offset = self.offset(block);
        let file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            path: self.path.clone(),
            serial: crate::serial::disk_serial(&self.path).ok(),
            logical_block_count: self.block_count,
            logical_block_size: self.logical_block_size,
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match self.file.take() {
            Some(file) => {
                file.sync_all()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn image(blocks: u64) -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(blocks * FALLBACK_BLOCK_SIZE).unwrap();
        tmp
    }

    fn rw() -> OpenFlags {
        OpenFlags { write: true, exclusive: false, direct_io: false }
    }

    #[test]
    fn regular_file_geometry() {
        let tmp = image(64);
        let dev = FileDevice::open(tmp.path(), rw()).unwrap();
        assert_eq!(dev.logical_block_count(), 64);
        assert_eq!(dev.logical_block_size(), 512);
        assert_eq!(dev.recommended_stepping(), 1);
    }

    #[test]
    fn write_then_read_back() {
        let tmp = image(16);
        let mut dev = FileDevice::open(tmp.path(), rw()).unwrap();
        let data = vec![0xA5u8; 2 * 512];
        assert_eq!(dev.write(7, 2, &data).unwrap(), 1024);
        let mut back = vec![0u8; 1024];
        dev.read(7, 2, &mut back).unwrap();
        assert_eq!(back, data);
        dev.close().unwrap();
        dev.close().unwrap();
        assert!(dev.read(7, 2, &mut back).unwrap_err().is_fatal());
    }

    #[test]
    fn out_of_range_is_rejected() {
        let tmp = image(8);
        let mut dev = FileDevice::open(tmp.path(), rw()).unwrap();
        let mut buf = vec![0u8; 2 * 512];
        let err = dev.read(7, 2, &mut buf).unwrap_err();
        assert!(err.is_fatal(), "{err}");
        let err = dev.write(0, 1, &buf).unwrap_err();
        assert!(err.is_fatal(), "misaligned length must be rejected: {err}");
    }

    #[test]
    fn ata_mode_is_unsupported() {
        let tmp = image(8);
        let mut dev = FileDevice::open(tmp.path(), rw()).unwrap();
        assert!(dev.set_access_mode(AccessMode::Os).is_ok());
        assert!(matches!(
            dev.set_access_mode(AccessMode::Ata),
            Err(DeviceError::Unsupported(_))
        ));
        assert_eq!(dev.access_mode(), AccessMode::Os);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileDevice::open(dir.path().join("nope.img"), rw()).is_err());
    }
}
