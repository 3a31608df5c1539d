use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::server::share::SMBFileIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SMBRangeLockKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SMBRangeLock {
    holder: u64,
    offset: u64,
    length: u64,
    kind: SMBRangeLockKind,
}

impl SMBRangeLock {
    fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    fn overlaps(&self, offset: u64, length: u64) -> bool {
        if self.length == 0 || length == 0 {
            return false;
        }
        offset < self.end() && self.offset < offset.saturating_add(length)
    }

    fn conflicts(&self, holder: u64, offset: u64, length: u64, kind: SMBRangeLockKind) -> bool {
        self.holder != holder
            && self.overlaps(offset, length)
            && (self.kind == SMBRangeLockKind::Write || kind == SMBRangeLockKind::Write)
    }
}

/// Advisory byte-range locks kept per file identity. Holders are descriptor ids, so two descriptors
/// on one file conflict with each other even inside the same process.
#[derive(Debug, Default)]
pub struct SMBRangeLockTable {
    locks: Mutex<HashMap<SMBFileIdentity, Vec<SMBRangeLock>>>,
}

impl SMBRangeLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<SMBFileIdentity, Vec<SMBRangeLock>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock(&self, identity: SMBFileIdentity, holder: u64, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        let mut locks = self.locks();
        let held = locks.entry(identity).or_default();
        if held.iter().any(|lock| lock.conflicts(holder, offset, length, kind)) {
            return Err(SMBError::lock_conflict(format!("range {}+{} on {} is locked", offset, length, identity)));
        }
        held.push(SMBRangeLock { holder, offset, length, kind });
        Ok(())
    }

    pub fn unlock(&self, identity: SMBFileIdentity, holder: u64, offset: u64, length: u64) -> SMBResult<()> {
        let mut locks = self.locks();
        let held = locks.get_mut(&identity)
            .ok_or(SMBError::response_error(NTStatus::RangeNotLocked))?;
        let position = held.iter()
            .position(|lock| lock.holder == holder && lock.offset == offset && lock.length == length)
            .ok_or(SMBError::response_error(NTStatus::RangeNotLocked))?;
        held.remove(position);
        if held.is_empty() {
            locks.remove(&identity);
        }
        Ok(())
    }

    pub fn release_all(&self, identity: SMBFileIdentity, holder: u64) {
        let mut locks = self.locks();
        if let Some(held) = locks.get_mut(&identity) {
            held.retain(|lock| lock.holder != holder);
            if held.is_empty() {
                locks.remove(&identity);
            }
        }
    }

    pub fn held_by(&self, identity: SMBFileIdentity, holder: u64) -> usize {
        self.locks()
            .get(&identity)
            .map(|held| held.iter().filter(|lock| lock.holder == holder).count())
            .unwrap_or(0)
    }
}
