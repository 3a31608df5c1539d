use std::fmt::{Debug, Display, Formatter};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use smb_core::SMBResult;

pub use file_system::{SMBFileSystemHandle, SMBLocalFileSystem};
pub use memory::{SMBMemoryHandle, SMBMemoryStorage};
pub use range_lock::{SMBRangeLockKind, SMBRangeLockTable};

pub mod file_system;
pub mod memory;
pub mod range_lock;

/// Stable identity of a file on its storage: a (device, inode) pair that survives renames and is
/// shared by every path leading to the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SMBFileIdentity {
    device: u64,
    inode: u64,
}

impl SMBFileIdentity {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    pub fn device(&self) -> u64 {
        self.device
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }
}

impl Display for SMBFileIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}:{:x}", self.device, self.inode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SMBFileMetadata {
    pub identity: SMBFileIdentity,
    pub size: u64,
    pub is_directory: bool,
    pub read_only: bool,
}

/// Physical access requested from the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SMBAccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl SMBAccessMode {
    pub fn can_read(&self) -> bool {
        !matches!(self, SMBAccessMode::WriteOnly)
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, SMBAccessMode::ReadOnly)
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Default, Copy, Clone)]
    pub struct SMBCreateFlags: u8 {
        const CREATE = 0x1;
        const EXCLUSIVE = 0x2;
        const TRUNCATE = 0x4;
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Default, Copy, Clone)]
    pub struct SMBFileAttributes: u32 {
        const READONLY = 0x1;
        const HIDDEN = 0x2;
        const SYSTEM = 0x4;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const NORMAL = 0x80;
    }
}

/// The storage operations the arbiter needs. Implementors own descriptor lifetime: every descriptor
/// handed out by `open` must eventually come back through `close`.
pub trait StorageBackend: Debug + Send + Sync {
    type Descriptor: Debug + Send + Sync;

    fn open(&self, path: &str, access: SMBAccessMode, flags: SMBCreateFlags, attributes: SMBFileAttributes) -> SMBResult<Self::Descriptor>;
    fn stat(&self, path: &str) -> SMBResult<SMBFileMetadata>;
    fn fstat(&self, descriptor: &Self::Descriptor) -> SMBResult<SMBFileMetadata>;
    fn truncate(&self, descriptor: &mut Self::Descriptor, length: u64) -> SMBResult<()>;
    fn close(&self, descriptor: Self::Descriptor) -> SMBResult<()>;
    fn lock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()>;
    fn unlock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64) -> SMBResult<()>;
    fn unlink(&self, path: &str) -> SMBResult<()>;
    fn mkdir(&self, path: &str) -> SMBResult<()>;
    fn rmdir(&self, path: &str) -> SMBResult<()>;
}

impl<T: ?Sized + StorageBackend> StorageBackend for Box<T> {
    type Descriptor = T::Descriptor;

    fn open(&self, path: &str, access: SMBAccessMode, flags: SMBCreateFlags, attributes: SMBFileAttributes) -> SMBResult<Self::Descriptor> {
        T::open(self, path, access, flags, attributes)
    }

    fn stat(&self, path: &str) -> SMBResult<SMBFileMetadata> {
        T::stat(self, path)
    }

    fn fstat(&self, descriptor: &Self::Descriptor) -> SMBResult<SMBFileMetadata> {
        T::fstat(self, descriptor)
    }

    fn truncate(&self, descriptor: &mut Self::Descriptor, length: u64) -> SMBResult<()> {
        T::truncate(self, descriptor, length)
    }

    fn close(&self, descriptor: Self::Descriptor) -> SMBResult<()> {
        T::close(self, descriptor)
    }

    fn lock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        T::lock_range(self, descriptor, offset, length, kind)
    }

    fn unlock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64) -> SMBResult<()> {
        T::unlock_range(self, descriptor, offset, length)
    }

    fn unlink(&self, path: &str) -> SMBResult<()> {
        T::unlink(self, path)
    }

    fn mkdir(&self, path: &str) -> SMBResult<()> {
        T::mkdir(self, path)
    }

    fn rmdir(&self, path: &str) -> SMBResult<()> {
        T::rmdir(self, path)
    }
}

/// Strips leading separators and folds `\` into `/` so both backends key paths the same way.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_capabilities() {
        assert!(SMBAccessMode::ReadOnly.can_read());
        assert!(!SMBAccessMode::ReadOnly.can_write());
        assert!(!SMBAccessMode::WriteOnly.can_read());
        assert!(SMBAccessMode::ReadWrite.can_write());
    }

    #[test]
    fn normalizes_separators() {
        assert_eq!(normalize_path("\\dir\\file.txt"), "dir/file.txt");
        assert_eq!(normalize_path("//a/b"), "a/b");
    }
}
