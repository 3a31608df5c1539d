use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::server::client::SMBProcessId;
use crate::server::share::SMBFileAttributes;
use crate::server::share_mode::{SMBDenyMode, SMBOpenMode, SMBOplockLevel};

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, Copy, Clone)]
pub enum SMBCreateDisposition {
    Supersede = 0x0,
    Open = 0x1,
    Create = 0x2,
    OpenIf = 0x3,
    Overwrite = 0x4,
    OverwriteIf = 0x5,
}

impl SMBCreateDisposition {
    pub fn fails_if_exists(&self) -> bool {
        *self == SMBCreateDisposition::Create
    }

    pub fn creates(&self) -> bool {
        !matches!(self, SMBCreateDisposition::Open | SMBCreateDisposition::Overwrite)
    }

    pub fn truncates(&self) -> bool {
        matches!(self, SMBCreateDisposition::Supersede | SMBCreateDisposition::Overwrite | SMBCreateDisposition::OverwriteIf)
    }

    /// Decodes a DOS open-function word: bits 0-1 say what to do with an existing file (fail, open,
    /// truncate), bit 4 whether a missing one is created.
    pub fn from_open_function(open_function: u16) -> SMBResult<Self> {
        let create = open_function & 0x10 != 0;
        match (open_function & 0x3, create) {
            (0x0, true) => Ok(SMBCreateDisposition::Create),
            (0x1, false) => Ok(SMBCreateDisposition::Open),
            (0x1, true) => Ok(SMBCreateDisposition::OpenIf),
            (0x2, false) => Ok(SMBCreateDisposition::Overwrite),
            (0x2, true) => Ok(SMBCreateDisposition::OverwriteIf),
            _ => Err(SMBError::response_error((NTStatus::InvalidParameter, format!("bad open function {:#x}", open_function)))),
        }
    }
}

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, Copy, Clone)]
pub enum SMBCreateAction {
    Superseded = 0x0,
    Opened = 0x1,
    Created = 0x2,
    Overwritten = 0x3,
}

bitflags! {
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Copy, Clone)]
    pub struct SMBAccessMask: u32 {
        const FILE_READ_DATA         = 0x00000001;
        const FILE_WRITE_DATA        = 0x00000002;
        const FILE_APPEND_DATA       = 0x00000004;
        const FILE_READ_EA           = 0x00000008;
        const FILE_WRITE_EA          = 0x00000010;
        const FILE_EXECUTE           = 0x00000020;
        const FILE_READ_ATTRIBUTES   = 0x00000080;
        const FILE_WRITE_ATTRIBUTES  = 0x00000100;
        const DELETE                 = 0x00010000;
        const READ_CONTROL           = 0x00020000;
        const SYNCHRONIZE            = 0x00100000;
        const MAXIMUM_ALLOWED        = 0x02000000;
        const GENERIC_ALL            = 0x10000000;
        const GENERIC_EXECUTE        = 0x20000000;
        const GENERIC_WRITE          = 0x40000000;
        const GENERIC_READ           = 0x80000000;
    }
}

impl SMBAccessMask {
    fn reads(&self) -> bool {
        self.intersects(SMBAccessMask::FILE_READ_DATA | SMBAccessMask::FILE_EXECUTE
            | SMBAccessMask::GENERIC_READ | SMBAccessMask::GENERIC_EXECUTE
            | SMBAccessMask::GENERIC_ALL | SMBAccessMask::MAXIMUM_ALLOWED)
    }

    fn writes(&self) -> bool {
        self.intersects(SMBAccessMask::FILE_WRITE_DATA | SMBAccessMask::FILE_APPEND_DATA
            | SMBAccessMask::GENERIC_WRITE | SMBAccessMask::GENERIC_ALL | SMBAccessMask::MAXIMUM_ALLOWED)
    }

    /// The open mode an NT desired-access mask amounts to. Attribute-only access opens read-only.
    pub fn open_mode(&self) -> SMBOpenMode {
        match (self.reads(), self.writes()) {
            (_, false) => SMBOpenMode::ReadOnly,
            (false, true) => SMBOpenMode::WriteOnly,
            (true, true) => SMBOpenMode::ReadWrite,
        }
    }

    pub fn wants_delete(&self) -> bool {
        self.intersects(SMBAccessMask::DELETE | SMBAccessMask::GENERIC_ALL)
    }
}

bitflags! {
    /// Flag bits carried in a DOS share-mode word next to the open and deny modes.
    #[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Copy, Clone)]
    pub struct SMBShareModeFlags: u32 {
        const WRITE_THROUGH = 0x4000;
        const ALLOW_SHARE_DELETE = 0x10000;
        const DELETE_ACCESS_REQUESTED = 0x20000;
        const DELETE_ON_CLOSE = 0x40000;
    }
}

const OPEN_MODE_MASK: u32 = 0xF;
const DENY_MODE_MASK: u32 = 0x70;
const DENY_MODE_SHIFT: u32 = 4;

/// A decoded open request as the protocol layer hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SMBOpenRequest {
    owner: SMBProcessId,
    path: String,
    open_mode: SMBOpenMode,
    deny_mode: SMBDenyMode,
    disposition: SMBCreateDisposition,
    attributes: SMBFileAttributes,
    oplock: SMBOplockLevel,
    allow_share_delete: bool,
    delete_access_requested: bool,
    delete_on_close: bool,
    write_through: bool,
}

impl SMBOpenRequest {
    pub fn new<P: Into<String>>(owner: SMBProcessId, path: P, open_mode: SMBOpenMode, deny_mode: SMBDenyMode, disposition: SMBCreateDisposition) -> Self {
        Self {
            owner,
            path: path.into(),
            open_mode,
            deny_mode,
            disposition,
            attributes: SMBFileAttributes::NORMAL,
            oplock: SMBOplockLevel::None,
            allow_share_delete: false,
            delete_access_requested: false,
            delete_on_close: false,
            write_through: false,
        }
    }

    pub fn from_access_mask<P: Into<String>>(owner: SMBProcessId, path: P, access: SMBAccessMask, deny_mode: SMBDenyMode, disposition: SMBCreateDisposition) -> Self {
        Self::new(owner, path, access.open_mode(), deny_mode, disposition)
            .delete_access(access.wants_delete())
    }

    /// Builds a request from the DOS share-mode and open-function words.
    pub fn from_legacy<P: Into<String>>(owner: SMBProcessId, path: P, share_mode: u32, open_function: u16, oplock: SMBOplockLevel) -> SMBResult<Self> {
        let open_mode = u8::try_from(share_mode & OPEN_MODE_MASK).ok()
            .and_then(|mode| SMBOpenMode::try_from_primitive(mode).ok())
            .ok_or(SMBError::response_error((NTStatus::InvalidParameter, format!("bad open mode in share mode {:#x}", share_mode))))?;
        let deny_mode = u8::try_from((share_mode & DENY_MODE_MASK) >> DENY_MODE_SHIFT).ok()
            .and_then(|mode| SMBDenyMode::try_from_primitive(mode).ok())
            .ok_or(SMBError::response_error((NTStatus::InvalidParameter, format!("bad deny mode in share mode {:#x}", share_mode))))?;
        let disposition = SMBCreateDisposition::from_open_function(open_function)?;
        let flags = SMBShareModeFlags::from_bits_truncate(share_mode);
        let mut request = Self::new(owner, path, open_mode, deny_mode, disposition)
            .with_oplock(oplock)
            .allow_share_delete(flags.contains(SMBShareModeFlags::ALLOW_SHARE_DELETE))
            .delete_access(flags.contains(SMBShareModeFlags::DELETE_ACCESS_REQUESTED))
            .delete_on_close(flags.contains(SMBShareModeFlags::DELETE_ON_CLOSE));
        request.write_through = flags.contains(SMBShareModeFlags::WRITE_THROUGH);
        Ok(request)
    }

    pub fn with_oplock(mut self, oplock: SMBOplockLevel) -> Self {
        self.oplock = oplock;
        self
    }

    pub fn with_attributes(mut self, attributes: SMBFileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn allow_share_delete(mut self, allow_share_delete: bool) -> Self {
        self.allow_share_delete = allow_share_delete;
        self
    }

    pub fn delete_access(mut self, delete_access_requested: bool) -> Self {
        self.delete_access_requested = delete_access_requested;
        self
    }

    pub fn delete_on_close(mut self, delete_on_close: bool) -> Self {
        self.delete_on_close = delete_on_close;
        self
    }

    pub fn owner(&self) -> SMBProcessId {
        self.owner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn open_mode(&self) -> SMBOpenMode {
        self.open_mode
    }

    pub fn deny_mode(&self) -> SMBDenyMode {
        self.deny_mode
    }

    pub fn disposition(&self) -> SMBCreateDisposition {
        self.disposition
    }

    pub fn attributes(&self) -> SMBFileAttributes {
        self.attributes
    }

    pub fn oplock(&self) -> SMBOplockLevel {
        self.oplock
    }

    pub fn shares_delete(&self) -> bool {
        self.allow_share_delete
    }

    pub fn delete_access_requested(&self) -> bool {
        self.delete_access_requested
    }

    pub fn wants_delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    pub fn write_through(&self) -> bool {
        self.write_through
    }
}
