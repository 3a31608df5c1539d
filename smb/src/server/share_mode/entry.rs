use std::fmt::{Display, Formatter};

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use crate::server::client::SMBProcessId;
use crate::server::share::SMBAccessMode;

/// Access an open was granted, as recorded in a share-mode entry. `Fcb` only ever appears in requests.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive)]
pub enum SMBOpenMode {
    ReadOnly = 0x0,
    WriteOnly = 0x1,
    ReadWrite = 0x2,
    Fcb = 0xF,
}

impl SMBOpenMode {
    pub fn access_mode(&self) -> SMBAccessMode {
        match self {
            SMBOpenMode::ReadOnly => SMBAccessMode::ReadOnly,
            SMBOpenMode::WriteOnly => SMBAccessMode::WriteOnly,
            SMBOpenMode::ReadWrite | SMBOpenMode::Fcb => SMBAccessMode::ReadWrite,
        }
    }
}

impl From<SMBAccessMode> for SMBOpenMode {
    fn from(value: SMBAccessMode) -> Self {
        match value {
            SMBAccessMode::ReadOnly => SMBOpenMode::ReadOnly,
            SMBAccessMode::WriteOnly => SMBOpenMode::WriteOnly,
            SMBAccessMode::ReadWrite => SMBOpenMode::ReadWrite,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive)]
pub enum SMBDenyMode {
    DenyDos = 0x0,
    DenyAll = 0x1,
    DenyWrite = 0x2,
    DenyRead = 0x3,
    DenyNone = 0x4,
    DenyFcb = 0x7,
}

impl SMBDenyMode {
    /// DOS and FCB compatibility modes follow their own sharing rules.
    pub fn is_compatibility(&self) -> bool {
        matches!(self, SMBDenyMode::DenyDos | SMBDenyMode::DenyFcb)
    }
}

/// Caching level held on an open. Ordered so that a smaller value is always a weaker lease.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TryFromPrimitive)]
pub enum SMBOplockLevel {
    None = 0x0,
    II = 0x1,
    Exclusive = 0x8,
    Batch = 0x9,
}

impl Default for SMBOplockLevel {
    fn default() -> Self {
        SMBOplockLevel::None
    }
}

impl SMBOplockLevel {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, SMBOplockLevel::Exclusive | SMBOplockLevel::Batch)
    }

    pub fn is_level_two(&self) -> bool {
        *self == SMBOplockLevel::II
    }

    pub fn is_none(&self) -> bool {
        *self == SMBOplockLevel::None
    }
}

/// Names one entry in a share-mode row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SMBEntryRef {
    pub owner: SMBProcessId,
    pub file_id: u64,
}

impl Display for SMBEntryRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.file_id)
    }
}

/// One live open of a file as every other opener sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBShareModeEntry {
    pub(crate) owner: SMBProcessId,
    pub(crate) file_id: u64,
    pub(crate) open_mode: SMBOpenMode,
    pub(crate) deny_mode: SMBDenyMode,
    pub(crate) allow_share_delete: bool,
    pub(crate) delete_access_requested: bool,
    pub(crate) delete_on_close: bool,
    pub(crate) oplock: SMBOplockLevel,
}

impl SMBShareModeEntry {
    pub fn new(owner: SMBProcessId, file_id: u64, open_mode: SMBOpenMode, deny_mode: SMBDenyMode) -> Self {
        Self {
            owner,
            file_id,
            open_mode,
            deny_mode,
            allow_share_delete: false,
            delete_access_requested: false,
            delete_on_close: false,
            oplock: SMBOplockLevel::None,
        }
    }

    pub fn with_delete_sharing(mut self, allow_share_delete: bool, delete_access_requested: bool) -> Self {
        self.allow_share_delete = allow_share_delete;
        self.delete_access_requested = delete_access_requested;
        self
    }

    pub fn with_oplock(mut self, oplock: SMBOplockLevel) -> Self {
        self.oplock = oplock;
        self
    }

    pub fn entry_ref(&self) -> SMBEntryRef {
        SMBEntryRef { owner: self.owner, file_id: self.file_id }
    }

    pub fn owner(&self) -> SMBProcessId {
        self.owner
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn open_mode(&self) -> SMBOpenMode {
        self.open_mode
    }

    pub fn deny_mode(&self) -> SMBDenyMode {
        self.deny_mode
    }

    pub fn allow_share_delete(&self) -> bool {
        self.allow_share_delete
    }

    pub fn delete_access_requested(&self) -> bool {
        self.delete_access_requested
    }

    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    pub fn oplock(&self) -> SMBOplockLevel {
        self.oplock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oplock_levels_order_by_strength() {
        assert!(SMBOplockLevel::None < SMBOplockLevel::II);
        assert!(SMBOplockLevel::II < SMBOplockLevel::Exclusive);
        assert!(SMBOplockLevel::Exclusive < SMBOplockLevel::Batch);
        assert!(SMBOplockLevel::Batch.is_exclusive());
        assert!(!SMBOplockLevel::II.is_exclusive());
    }

    #[test]
    fn deny_modes_decode_from_wire_values() {
        assert_eq!(SMBDenyMode::try_from_primitive(0x4).unwrap(), SMBDenyMode::DenyNone);
        assert_eq!(SMBDenyMode::try_from_primitive(0x7).unwrap(), SMBDenyMode::DenyFcb);
        assert!(SMBDenyMode::try_from_primitive(0x5).is_err());
    }

    #[test]
    fn fcb_requests_read_write_access() {
        assert_eq!(SMBOpenMode::Fcb.access_mode(), SMBAccessMode::ReadWrite);
        assert_eq!(SMBOpenMode::from(SMBAccessMode::WriteOnly), SMBOpenMode::WriteOnly);
    }
}
