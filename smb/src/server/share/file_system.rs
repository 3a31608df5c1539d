use std::fs::{File, Metadata, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::server::share::{normalize_path, SMBAccessMode, SMBCreateFlags, SMBFileAttributes, SMBFileIdentity, SMBFileMetadata, SMBRangeLockKind, SMBRangeLockTable, StorageBackend};

#[derive(Debug)]
pub struct SMBFileSystemHandle {
    id: u64,
    identity: SMBFileIdentity,
    file: File,
}

impl SMBFileSystemHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

/// A share rooted at a local directory. Range locks are advisory and kept in-process.
#[derive(Debug)]
pub struct SMBLocalFileSystem {
    root: PathBuf,
    next_descriptor: AtomicU64,
    range_locks: SMBRangeLockTable,
}

impl SMBLocalFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            next_descriptor: AtomicU64::new(1),
            range_locks: SMBRangeLockTable::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a share path under the root. Paths that climb out with `..` are refused.
    fn resolve(&self, path: &str) -> SMBResult<PathBuf> {
        let relative = PathBuf::from(normalize_path(path));
        if relative.components().any(|component| !matches!(component, Component::Normal(_) | Component::CurDir)) {
            return Err(SMBError::response_error((NTStatus::ObjectPathSyntaxBad, format!("{} leaves the share", path))));
        }
        Ok(self.root.join(relative))
    }

    fn options(access: SMBAccessMode, flags: SMBCreateFlags) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(access.can_read())
            .write(access.can_write());
        if flags.contains(SMBCreateFlags::CREATE | SMBCreateFlags::EXCLUSIVE) {
            options.create_new(true);
        } else if flags.contains(SMBCreateFlags::CREATE) {
            options.create(true);
        }
        if flags.contains(SMBCreateFlags::TRUNCATE) {
            options.truncate(true);
        }
        options
    }

    /// A read-only descriptor cannot create or truncate, so that part goes through a short-lived
    /// writer first and the caller's descriptor is opened afterwards without those flags.
    fn open_file(local_path: &Path, access: SMBAccessMode, flags: SMBCreateFlags) -> SMBResult<File> {
        if access.can_write() {
            return Self::options(access, flags).open(local_path).map_err(SMBError::io_error);
        }
        let creates = flags.contains(SMBCreateFlags::CREATE)
            && (flags.contains(SMBCreateFlags::EXCLUSIVE) || !local_path.exists());
        if creates || flags.contains(SMBCreateFlags::TRUNCATE) {
            let writer = Self::options(SMBAccessMode::WriteOnly, flags)
                .open(local_path)
                .map_err(SMBError::io_error)?;
            drop(writer);
        }
        Self::options(access, SMBCreateFlags::empty())
            .open(local_path)
            .map_err(SMBError::io_error)
    }
}

#[cfg(unix)]
fn identity_of(metadata: &Metadata, _path: &Path) -> SMBFileIdentity {
    use std::os::unix::fs::MetadataExt;
    SMBFileIdentity::new(metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn identity_of(_metadata: &Metadata, path: &Path) -> SMBFileIdentity {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    SMBFileIdentity::new(0, hasher.finish())
}

fn metadata_of(metadata: &Metadata, identity: SMBFileIdentity) -> SMBFileMetadata {
    SMBFileMetadata {
        identity,
        size: metadata.len(),
        is_directory: metadata.is_dir(),
        read_only: metadata.permissions().readonly(),
    }
}

impl StorageBackend for SMBLocalFileSystem {
    type Descriptor = SMBFileSystemHandle;

    fn open(&self, path: &str, access: SMBAccessMode, flags: SMBCreateFlags, attributes: SMBFileAttributes) -> SMBResult<Self::Descriptor> {
        let local_path = self.resolve(path)?;
        let created = flags.contains(SMBCreateFlags::CREATE) && !local_path.exists();
        let file = Self::open_file(&local_path, access, flags)?;
        if created && attributes.contains(SMBFileAttributes::READONLY) {
            let mut permissions = file.metadata().map_err(SMBError::io_error)?.permissions();
            permissions.set_readonly(true);
            file.set_permissions(permissions).map_err(SMBError::io_error)?;
        }
        let metadata = file.metadata().map_err(SMBError::io_error)?;
        Ok(SMBFileSystemHandle {
            id: self.next_descriptor.fetch_add(1, Ordering::SeqCst),
            identity: identity_of(&metadata, &local_path),
            file,
        })
    }

    fn stat(&self, path: &str) -> SMBResult<SMBFileMetadata> {
        let local_path = self.resolve(path)?;
        let metadata = std::fs::metadata(&local_path).map_err(SMBError::io_error)?;
        Ok(metadata_of(&metadata, identity_of(&metadata, &local_path)))
    }

    fn fstat(&self, descriptor: &Self::Descriptor) -> SMBResult<SMBFileMetadata> {
        let metadata = descriptor.file.metadata().map_err(SMBError::io_error)?;
        Ok(metadata_of(&metadata, descriptor.identity))
    }

    fn truncate(&self, descriptor: &mut Self::Descriptor, length: u64) -> SMBResult<()> {
        descriptor.file.set_len(length).map_err(SMBError::io_error)
    }

    fn close(&self, descriptor: Self::Descriptor) -> SMBResult<()> {
        self.range_locks.release_all(descriptor.identity, descriptor.id);
        drop(descriptor.file);
        Ok(())
    }

    fn lock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        self.range_locks.lock(descriptor.identity, descriptor.id, offset, length, kind)
    }

    fn unlock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64) -> SMBResult<()> {
        self.range_locks.unlock(descriptor.identity, descriptor.id, offset, length)
    }

    fn unlink(&self, path: &str) -> SMBResult<()> {
        std::fs::remove_file(self.resolve(path)?).map_err(SMBError::io_error)
    }

    fn mkdir(&self, path: &str) -> SMBResult<()> {
        std::fs::create_dir(self.resolve(path)?).map_err(SMBError::io_error)
    }

    fn rmdir(&self, path: &str) -> SMBResult<()> {
        std::fs::remove_dir(self.resolve(path)?).map_err(SMBError::io_error)
    }
}

#[cfg(test)]
mod tests {
    use smb_core::nt_status::NTStatus;

    use super::*;

    #[test]
    fn create_then_stat_agree_on_identity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SMBLocalFileSystem::new(dir.path());
        let handle = storage.open("new.txt", SMBAccessMode::ReadWrite, SMBCreateFlags::CREATE, SMBFileAttributes::empty()).unwrap();
        let by_path = storage.stat("new.txt").unwrap();
        let by_descriptor = storage.fstat(&handle).unwrap();
        assert_eq!(by_path.identity, by_descriptor.identity);
        assert!(!by_path.is_directory);
        storage.close(handle).unwrap();
    }

    #[test]
    fn missing_file_maps_to_name_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SMBLocalFileSystem::new(dir.path());
        let err = storage.stat("missing.txt").unwrap_err();
        assert_eq!(err.status(), NTStatus::ObjectNameNotFound);
    }

    #[test]
    fn truncate_resets_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
        let storage = SMBLocalFileSystem::new(dir.path());
        let mut handle = storage.open("/data.bin", SMBAccessMode::ReadWrite, SMBCreateFlags::empty(), SMBFileAttributes::empty()).unwrap();
        storage.truncate(&mut handle, 0).unwrap();
        assert_eq!(storage.fstat(&handle).unwrap().size, 0);
        storage.close(handle).unwrap();
    }

    #[test]
    fn read_only_descriptor_can_create() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SMBLocalFileSystem::new(dir.path());
        let handle = storage.open("fresh.txt", SMBAccessMode::ReadOnly, SMBCreateFlags::CREATE, SMBFileAttributes::empty()).unwrap();
        assert!(dir.path().join("fresh.txt").is_file());
        storage.close(handle).unwrap();

        let handle = storage.open("fresh.txt", SMBAccessMode::ReadOnly, SMBCreateFlags::CREATE, SMBFileAttributes::empty()).unwrap();
        storage.close(handle).unwrap();

        let err = storage.open("fresh.txt", SMBAccessMode::ReadOnly, SMBCreateFlags::CREATE | SMBCreateFlags::EXCLUSIVE, SMBFileAttributes::empty()).unwrap_err();
        assert_eq!(err.status(), NTStatus::ObjectNameCollision);
    }

    #[test]
    fn parent_components_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let share = dir.path().join("share");
        std::fs::create_dir(&share).unwrap();
        std::fs::write(dir.path().join("outside.txt"), b"secret").unwrap();
        let storage = SMBLocalFileSystem::new(&share);
        for path in ["../outside.txt", "sub/../../outside.txt", "..\\outside.txt"] {
            assert_eq!(storage.stat(path).unwrap_err().status(), NTStatus::ObjectPathSyntaxBad);
            let err = storage.open(path, SMBAccessMode::ReadOnly, SMBCreateFlags::empty(), SMBFileAttributes::empty()).unwrap_err();
            assert_eq!(err.status(), NTStatus::ObjectPathSyntaxBad);
        }
        assert!(storage.unlink("../outside.txt").is_err());
        assert!(dir.path().join("outside.txt").exists());
    }

    #[test]
    fn directories_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SMBLocalFileSystem::new(dir.path());
        storage.mkdir("sub").unwrap();
        assert!(storage.stat("sub").unwrap().is_directory);
        storage.rmdir("sub").unwrap();
        assert!(storage.stat("sub").is_err());
    }
}
