use std::sync::atomic::{AtomicU8, Ordering};

use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;
use smb_share_modes::server::{SMBCreateDisposition, SMBOpenArbiter, SMBOpenArbiterBuilder, SMBOpenRequest};
use smb_share_modes::server::share::{SMBAccessMode, SMBCreateFlags, SMBFileAttributes, SMBFileMetadata, SMBMemoryHandle, SMBMemoryStorage, SMBRangeLockKind, StorageBackend};
use smb_share_modes::server::share_mode::{SMBDenyMode, SMBOpenMode};

const ALLOW: u8 = 0;
const REFUSE_WRITES: u8 = 1;
const REFUSE_ALL: u8 = 2;

/// Memory storage whose permission checks can be tightened after files are open, the way a
/// filesystem ACL can change underneath a share.
#[derive(Debug, Default)]
struct RestrictedStorage {
    inner: SMBMemoryStorage,
    policy: AtomicU8,
}

impl RestrictedStorage {
    fn restrict(&self, policy: u8) {
        self.policy.store(policy, Ordering::SeqCst);
    }
}

impl StorageBackend for RestrictedStorage {
    type Descriptor = SMBMemoryHandle;

    fn open(&self, path: &str, access: SMBAccessMode, flags: SMBCreateFlags, attributes: SMBFileAttributes) -> SMBResult<Self::Descriptor> {
        let refused = match self.policy.load(Ordering::SeqCst) {
            REFUSE_ALL => true,
            REFUSE_WRITES => access.can_write(),
            _ => false,
        };
        if refused {
            return Err(SMBError::io_error(std::io::ErrorKind::PermissionDenied));
        }
        self.inner.open(path, access, flags, attributes)
    }

    fn stat(&self, path: &str) -> SMBResult<SMBFileMetadata> {
        self.inner.stat(path)
    }

    fn fstat(&self, descriptor: &Self::Descriptor) -> SMBResult<SMBFileMetadata> {
        self.inner.fstat(descriptor)
    }

    fn truncate(&self, descriptor: &mut Self::Descriptor, length: u64) -> SMBResult<()> {
        self.inner.truncate(descriptor, length)
    }

    fn close(&self, descriptor: Self::Descriptor) -> SMBResult<()> {
        self.inner.close(descriptor)
    }

    fn lock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        self.inner.lock_range(descriptor, offset, length, kind)
    }

    fn unlock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64) -> SMBResult<()> {
        self.inner.unlock_range(descriptor, offset, length)
    }

    fn unlink(&self, path: &str) -> SMBResult<()> {
        self.inner.unlink(path)
    }

    fn mkdir(&self, path: &str) -> SMBResult<()> {
        self.inner.mkdir(path)
    }

    fn rmdir(&self, path: &str) -> SMBResult<()> {
        self.inner.rmdir(path)
    }
}

fn arbiter() -> SMBOpenArbiter<RestrictedStorage> {
    let arbiter = SMBOpenArbiterBuilder::new(RestrictedStorage::default()).build().unwrap();
    arbiter.backend().inner.add_file("payroll.xls", 16);
    arbiter
}

#[tokio::test]
async fn access_denied_outranks_sharing_violation() {
    let arbiter = arbiter();
    let holder = arbiter.register_owner();
    let reader = arbiter.register_owner();

    let exclusive = SMBOpenRequest::new(holder.process_id(), "payroll.xls", SMBOpenMode::ReadWrite, SMBDenyMode::DenyAll, SMBCreateDisposition::Open);
    arbiter.open_file_shared(&exclusive).await.unwrap();

    let read = SMBOpenRequest::new(reader.process_id(), "payroll.xls", SMBOpenMode::ReadOnly, SMBDenyMode::DenyNone, SMBCreateDisposition::Open);
    assert_eq!(arbiter.open_file_shared(&read).await.unwrap_err().status(), NTStatus::SharingViolation);

    arbiter.backend().restrict(REFUSE_ALL);
    assert_eq!(arbiter.open_file_shared(&read).await.unwrap_err().status(), NTStatus::AccessDenied);
    assert_eq!(arbiter.diagnostics().permission_errors(), 1);
    assert_eq!(arbiter.diagnostics().sharing_violations(), 2);
    assert_eq!(arbiter.backend().inner.open_descriptors(), 1);
}

#[tokio::test]
async fn fcb_open_falls_back_to_read_only() {
    let arbiter = arbiter();
    let owner = arbiter.register_owner();
    arbiter.backend().restrict(REFUSE_WRITES);

    let fcb = SMBOpenRequest::new(owner.process_id(), "payroll.xls", SMBOpenMode::Fcb, SMBDenyMode::DenyFcb, SMBCreateDisposition::Open);
    let outcome = arbiter.open_file_shared(&fcb).await.unwrap();
    assert!(outcome.open.can_read());
    assert!(!outcome.open.can_write());
    let entries = arbiter.share_modes("payroll.xls").await.unwrap();
    assert_eq!(entries[0].open_mode(), SMBOpenMode::ReadOnly);

    let write = SMBOpenRequest::new(owner.process_id(), "payroll.xls", SMBOpenMode::ReadWrite, SMBDenyMode::DenyNone, SMBCreateDisposition::Open);
    assert_eq!(arbiter.open_file_shared(&write).await.unwrap_err().status(), NTStatus::AccessDenied);
}
