use std::fmt::Debug;

use crate::server::client::SMBProcessId;
use crate::server::request::SMBCreateAction;
use crate::server::share::{SMBAccessMode, SMBFileAttributes, SMBFileIdentity, SMBFileMetadata, StorageBackend};
use crate::server::share_mode::{SMBEntryRef, SMBOpenMode, SMBOplockLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMBOpenKind {
    File,
    Directory,
    Stat,
}

/// A live handle. It owns the storage descriptor (if any) and the share-mode entry it registered;
/// both go away together through `SMBOpenArbiter::close`.
#[derive(Debug)]
pub struct SMBOpen<B: StorageBackend> {
    file_id: u64,
    owner: SMBProcessId,
    path: String,
    kind: SMBOpenKind,
    descriptor: Option<B::Descriptor>,
    metadata: SMBFileMetadata,
    attributes: SMBFileAttributes,
    open_mode: SMBOpenMode,
    can_read: bool,
    can_write: bool,
    delete_access: bool,
    delete_on_close: bool,
    oplock_level: SMBOplockLevel,
    closed: bool,
}

impl<B: StorageBackend> SMBOpen<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn file(file_id: u64, owner: SMBProcessId, path: &str, descriptor: B::Descriptor, metadata: SMBFileMetadata, attributes: SMBFileAttributes, access: SMBAccessMode, delete_access: bool, oplock_level: SMBOplockLevel) -> Self {
        Self {
            file_id,
            owner,
            path: path.to_string(),
            kind: SMBOpenKind::File,
            descriptor: Some(descriptor),
            metadata,
            attributes,
            open_mode: access.into(),
            can_read: access.can_read(),
            can_write: access.can_write(),
            delete_access,
            delete_on_close: false,
            oplock_level,
            closed: false,
        }
    }

    pub(crate) fn directory(file_id: u64, owner: SMBProcessId, path: &str, metadata: SMBFileMetadata, delete_access: bool) -> Self {
        Self {
            file_id,
            owner,
            path: path.to_string(),
            kind: SMBOpenKind::Directory,
            descriptor: None,
            metadata,
            attributes: SMBFileAttributes::DIRECTORY,
            open_mode: SMBOpenMode::ReadOnly,
            can_read: false,
            can_write: false,
            delete_access,
            delete_on_close: false,
            oplock_level: SMBOplockLevel::None,
            closed: false,
        }
    }

    pub(crate) fn stat(file_id: u64, owner: SMBProcessId, path: &str, metadata: SMBFileMetadata) -> Self {
        Self {
            file_id,
            owner,
            path: path.to_string(),
            kind: SMBOpenKind::Stat,
            descriptor: None,
            metadata,
            attributes: SMBFileAttributes::empty(),
            open_mode: SMBOpenMode::ReadOnly,
            can_read: false,
            can_write: false,
            delete_access: false,
            delete_on_close: false,
            oplock_level: SMBOplockLevel::None,
            closed: false,
        }
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn owner(&self) -> SMBProcessId {
        self.owner
    }

    pub fn entry_ref(&self) -> SMBEntryRef {
        SMBEntryRef { owner: self.owner, file_id: self.file_id }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identity(&self) -> SMBFileIdentity {
        self.metadata.identity
    }

    pub fn kind(&self) -> SMBOpenKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == SMBOpenKind::Directory
    }

    pub fn is_stat_open(&self) -> bool {
        self.kind == SMBOpenKind::Stat
    }

    pub fn descriptor(&self) -> Option<&B::Descriptor> {
        self.descriptor.as_ref()
    }

    pub fn metadata(&self) -> &SMBFileMetadata {
        &self.metadata
    }

    pub fn attributes(&self) -> SMBFileAttributes {
        self.attributes
    }

    pub fn open_mode(&self) -> SMBOpenMode {
        self.open_mode
    }

    pub fn can_read(&self) -> bool {
        self.can_read
    }

    pub fn can_write(&self) -> bool {
        self.can_write
    }

    pub fn has_delete_access(&self) -> bool {
        self.delete_access
    }

    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    pub fn oplock_level(&self) -> SMBOplockLevel {
        self.oplock_level
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_delete_on_close(&mut self, delete_on_close: bool) {
        self.delete_on_close = delete_on_close;
    }

    pub(crate) fn set_oplock_level(&mut self, oplock_level: SMBOplockLevel) {
        self.oplock_level = oplock_level;
    }

    /// Marks the handle closed and hands back its descriptor. Returns `None` the second time.
    pub(crate) fn begin_close(&mut self) -> Option<Option<B::Descriptor>> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.oplock_level = SMBOplockLevel::None;
        Some(self.descriptor.take())
    }
}

/// A successful open: the handle plus what happened to the file.
#[derive(Debug)]
pub struct SMBOpenOutcome<B: StorageBackend> {
    pub open: SMBOpen<B>,
    pub action: SMBCreateAction,
}

impl<B: StorageBackend> SMBOpenOutcome<B> {
    pub fn into_open(self) -> SMBOpen<B> {
        self.open
    }
}
