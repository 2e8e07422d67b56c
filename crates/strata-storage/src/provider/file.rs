//! Host file block device
//!
//! Opens the backing file with host buffering disabled and write-through
//! enabled, so a `write` that has returned is physically durable. This
//! is the durability anchor the journal layer above depends on:
//! - Linux: `O_DIRECT | O_SYNC`
//! - macOS: `F_NOCACHE` fcntl plus `O_SYNC`
//!
//! Transfers move exactly one block at byte offset
//! `address * block_size`. The device cannot grow past the file length;
//! [`FileProvider::create`] pre-sizes a fresh backing file instead.

use crate::block::Block;
use crate::layout::is_valid_block_size;
use crate::provider::Provider;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use strata_common::{Error, Result};
use tracing::{debug, warn};

#[cfg(any(target_os = "linux", target_os = "macos"))]
use std::os::unix::fs::OpenOptionsExt;

/// Block device over a pre-sized host file
pub struct FileProvider {
    file: File,
    path: String,
    block_size: u32,
    block_count: u64,
    direct_io: bool,
}

impl FileProvider {
    /// Open an existing backing file as a block device.
    ///
    /// The file length must be a whole multiple of `block_size`; the
    /// device size is derived from it.
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        let path_str = path.as_ref().to_string_lossy().to_string();
        let (file, direct_io) = open_unbuffered(path.as_ref())?;

        let len = file.metadata()?.len();
        if len % u64::from(block_size) != 0 {
            return Err(Error::MisalignedDevice {
                path: path_str,
                len,
                block_size,
            });
        }
        let block_count = len / u64::from(block_size);

        debug!(
            path = %path_str,
            block_size,
            block_count,
            direct_io,
            "opened block device file"
        );

        Ok(Self {
            file,
            path: path_str,
            block_size,
            block_count,
            direct_io,
        })
    }

    /// Pre-create a backing file of `block_count * block_size` bytes and
    /// open it as a device. Truncates an existing file.
    pub fn create(path: impl AsRef<Path>, block_count: u64, block_size: u32) -> Result<Self> {
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        let file = File::create(path.as_ref())?;
        file.set_len(block_count * u64::from(block_size))?;
        file.sync_all()?;
        drop(file);

        debug!(
            path = %path.as_ref().display(),
            block_count,
            block_size,
            "created backing file"
        );

        Self::open(path, block_size)
    }

    /// Whether the file is open for direct I/O, or syncing writes only
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.direct_io
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn check_range(&self, address: u64) -> Result<u64> {
        if address >= self.block_count {
            return Err(Error::OutOfRange {
                address,
                block_count: self.block_count,
            });
        }
        Ok(address * u64::from(self.block_size))
    }
}

impl Provider for FileProvider {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Growing past the file length is unsupported; the file must be
    /// pre-sized with [`FileProvider::create`]
    fn enlarge(&mut self, block_count: u64) -> Result<bool> {
        Ok(block_count <= self.block_count)
    }

    fn write(&mut self, address: u64, block: &Block) -> Result<()> {
        let offset = self.check_range(address)?;
        if block.len() != self.block_size as usize {
            return Err(Error::WrongBlockLength {
                expected: self.block_size,
                actual: block.len(),
            });
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(block.as_slice())?;

        // Without open flags to enforce write-through, fall back to an
        // explicit flush per write
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        self.file.sync_data()?;

        Ok(())
    }

    fn read(&self, address: u64) -> Result<Option<Block>> {
        let offset = self.check_range(address)?;

        let mut block = Block::zeroed(self.block_size);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(block.as_mut_slice())?;

        Ok(Some(block))
    }

    fn physical_location(&self, address: u64) -> String {
        format!("{}@{}", self.path, address * u64::from(self.block_size))
    }
}

/// Open with host buffering disabled and write-through enabled.
/// Returns the handle and whether direct I/O is active.
#[cfg(target_os = "linux")]
fn open_unbuffered(path: &Path) -> Result<(File, bool)> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    options.custom_flags(libc::O_DIRECT | libc::O_SYNC);

    match options.open(path) {
        Ok(file) => Ok((file, true)),
        // Not every filesystem supports O_DIRECT (tmpfs notably); keep
        // the write-through guarantee and give up on unbuffered reads
        Err(err) if err.raw_os_error() == Some(libc::EINVAL) => {
            warn!(
                path = %path.display(),
                "filesystem rejected O_DIRECT, falling back to O_SYNC writes"
            );
            let mut options = OpenOptions::new();
            options.read(true).write(true);
            options.custom_flags(libc::O_SYNC);
            Ok((options.open(path)?, false))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(target_os = "macos")]
fn open_unbuffered(path: &Path) -> Result<(File, bool)> {
    use std::os::unix::io::AsRawFd;

    let mut options = OpenOptions::new();
    options.read(true).write(true);
    options.custom_flags(libc::O_SYNC);
    let file = options.open(path)?;

    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok((file, true))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn open_unbuffered(path: &Path) -> Result<(File, bool)> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok((file, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use tempfile::tempdir;

    const BLOCK_SIZE: u32 = 4096;

    fn random_block() -> Block {
        let mut block = Block::zeroed(BLOCK_SIZE);
        rand::thread_rng().fill_bytes(block.as_mut_slice());
        block
    }

    #[test]
    fn test_create_and_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");

        let mut provider = FileProvider::create(&path, 64, BLOCK_SIZE).unwrap();
        assert_eq!(provider.block_count(), 64);
        assert_eq!(provider.block_size(), BLOCK_SIZE);

        let block = random_block();
        provider.write(7, &block).unwrap();
        assert_eq!(provider.read(7).unwrap(), Some(block));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");
        let block = random_block();

        {
            let mut provider = FileProvider::create(&path, 16, BLOCK_SIZE).unwrap();
            provider.write(3, &block).unwrap();
        }

        let provider = FileProvider::open(&path, BLOCK_SIZE).unwrap();
        assert_eq!(provider.block_count(), 16);
        assert_eq!(provider.read(3).unwrap(), Some(block));
    }

    #[test]
    fn test_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");
        let mut provider = FileProvider::create(&path, 8, BLOCK_SIZE).unwrap();

        assert!(matches!(
            provider.read(8),
            Err(Error::OutOfRange {
                address: 8,
                block_count: 8
            })
        ));
        assert!(matches!(
            provider.write(8, &Block::zeroed(BLOCK_SIZE)),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_wrong_block_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");
        let mut provider = FileProvider::create(&path, 8, BLOCK_SIZE).unwrap();

        assert!(matches!(
            provider.write(0, &Block::zeroed(512)),
            Err(Error::WrongBlockLength {
                expected: BLOCK_SIZE,
                actual: 512
            })
        ));
    }

    #[test]
    fn test_enlarge_semantics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");
        let mut provider = FileProvider::create(&path, 8, BLOCK_SIZE).unwrap();

        assert!(provider.enlarge(8).unwrap());
        assert!(provider.enlarge(4).unwrap());
        assert!(!provider.enlarge(9).unwrap());
        assert_eq!(provider.block_count(), 8);
    }

    #[test]
    fn test_misaligned_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.db");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();

        assert!(matches!(
            FileProvider::open(&path, BLOCK_SIZE),
            Err(Error::MisalignedDevice { len: 1000, .. })
        ));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(matches!(
            FileProvider::open(&path, BLOCK_SIZE),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_physical_location() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.db");
        let provider = FileProvider::create(&path, 8, BLOCK_SIZE).unwrap();

        let location = provider.physical_location(2);
        assert!(location.starts_with(provider.path()));
        assert!(location.ends_with("@8192"));
    }
}
