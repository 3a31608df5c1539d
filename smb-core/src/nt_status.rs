use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// The subset of NT status codes the open path reports back to the protocol layer.
#[repr(u32)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, Copy)]
pub enum NTStatus {
    StatusSuccess = 0x0,
    InvalidParameter = 0xC000000D,
    AccessDenied = 0xC0000022,
    ObjectNameNotFound = 0xC0000034,
    ObjectNameCollision = 0xC0000035,
    ObjectPathSyntaxBad = 0xC000003B,
    SharingViolation = 0xC0000043,
    FileLockConflict = 0xC0000054,
    DeletePending = 0xC0000056,
    RangeNotLocked = 0xC000007E,
    InsufficientResources = 0xC000009A,
    FileIsADirectory = 0xC00000BA,
    NotADirectory = 0xC0000103,
    TooManyOpenedFiles = 0xC000011F,
    CannotDelete = 0xC0000121,
    FileClosed = 0xC0000128,
    UnknownError = 0xFFFFFFFF,
}

impl NTStatus {
    pub fn is_success(&self) -> bool {
        *self == NTStatus::StatusSuccess
    }
}

impl From<NTStatus> for u32 {
    fn from(value: NTStatus) -> Self {
        value as u32
    }
}
