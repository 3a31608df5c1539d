use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use smb_core::error::SMBError;
use smb_core::logging::trace;
use smb_core::SMBResult;

use crate::server::client::SMBProcessId;
use crate::server::share::SMBFileIdentity;
use crate::server::share_mode::{SMBEntryRef, SMBOplockLevel, SMBShareModeEntry};

type SMBShareModeRow = Arc<Mutex<Vec<SMBShareModeEntry>>>;

/// Every live open of every file, keyed by file identity. Each identity has its own async lock,
/// so arbitration on one file never waits on another.
#[derive(Debug, Default)]
pub struct SMBShareModeTable {
    rows: std::sync::Mutex<HashMap<SMBFileIdentity, SMBShareModeRow>>,
}

/// Exclusive access to one identity's entries. Dropping it releases the lock and discards the row
/// once it is empty and nobody else is waiting on it.
#[derive(Debug)]
pub struct SMBShareModeGuard<'a> {
    table: &'a SMBShareModeTable,
    identity: SMBFileIdentity,
    row: Option<OwnedMutexGuard<Vec<SMBShareModeEntry>>>,
}

impl SMBShareModeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<SMBFileIdentity, SMBShareModeRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn lock(&self, identity: SMBFileIdentity) -> SMBShareModeGuard<'_> {
        let row = self.rows()
            .entry(identity)
            .or_default()
            .clone();
        let guard = row.lock_owned().await;
        SMBShareModeGuard {
            table: self,
            identity,
            row: Some(guard),
        }
    }

    pub fn identities(&self) -> Vec<SMBFileIdentity> {
        self.rows().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    pub async fn entries(&self, identity: SMBFileIdentity) -> Vec<SMBShareModeEntry> {
        self.lock(identity).await.entries().to_vec()
    }

    pub async fn snapshot(&self) -> SMBResult<Vec<u8>> {
        let mut rows = Vec::new();
        for identity in self.identities() {
            let guard = self.lock(identity).await;
            if !guard.is_empty() {
                rows.push((identity, guard.entries().to_vec()));
            }
        }
        bincode::serialize(&rows).map_err(SMBError::parse_error)
    }

    pub fn restore(bytes: &[u8]) -> SMBResult<Self> {
        let rows: Vec<(SMBFileIdentity, Vec<SMBShareModeEntry>)> = bincode::deserialize(bytes)
            .map_err(SMBError::parse_error)?;
        let rows = rows.into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(identity, entries)| (identity, Arc::new(Mutex::new(entries))))
            .collect();
        Ok(Self {
            rows: std::sync::Mutex::new(rows),
        })
    }

    fn collect(&self, identity: SMBFileIdentity) {
        let mut rows = self.rows();
        let Some(row) = rows.get(&identity) else {
            return;
        };
        if Arc::strong_count(row) != 1 {
            return;
        }
        let empty = match row.try_lock() {
            Ok(entries) => entries.is_empty(),
            Err(_) => false,
        };
        if empty {
            trace!("discarding empty share mode row {}", identity);
            rows.remove(&identity);
        }
    }
}

impl SMBShareModeGuard<'_> {
    pub fn identity(&self) -> SMBFileIdentity {
        self.identity
    }

    fn row(&self) -> &[SMBShareModeEntry] {
        self.row.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    fn row_mut(&mut self) -> Option<&mut Vec<SMBShareModeEntry>> {
        self.row.as_deref_mut()
    }

    pub fn entries(&self) -> &[SMBShareModeEntry] {
        self.row()
    }

    pub fn len(&self) -> usize {
        self.row().len()
    }

    pub fn is_empty(&self) -> bool {
        self.row().is_empty()
    }

    pub fn find(&self, entry: SMBEntryRef) -> Option<&SMBShareModeEntry> {
        self.row().iter().find(|candidate| candidate.entry_ref() == entry)
    }

    pub fn insert(&mut self, entry: SMBShareModeEntry) {
        if let Some(row) = self.row_mut() {
            row.push(entry);
        }
    }

    /// Removing an entry that is already gone is a no-op.
    pub fn remove(&mut self, entry: SMBEntryRef) -> Option<SMBShareModeEntry> {
        let row = self.row_mut()?;
        let position = row.iter().position(|candidate| candidate.entry_ref() == entry)?;
        Some(row.remove(position))
    }

    pub fn remove_owned_by(&mut self, owner: SMBProcessId) -> Vec<SMBShareModeEntry> {
        let Some(row) = self.row_mut() else {
            return Vec::new();
        };
        let (removed, kept) = std::mem::take(row)
            .into_iter()
            .partition(|entry| entry.owner == owner);
        *row = kept;
        removed
    }

    pub fn set_oplock(&mut self, entry: SMBEntryRef, level: SMBOplockLevel) -> bool {
        let Some(row) = self.row_mut() else {
            return false;
        };
        match row.iter_mut().find(|candidate| candidate.entry_ref() == entry) {
            Some(found) => {
                found.oplock = level;
                true
            }
            None => false,
        }
    }

    pub fn set_delete_on_close(&mut self, delete_on_close: bool) {
        if let Some(row) = self.row_mut() {
            row.iter_mut().for_each(|entry| entry.delete_on_close = delete_on_close);
        }
    }
}

impl Drop for SMBShareModeGuard<'_> {
    fn drop(&mut self) {
        if let Some(row) = self.row.take() {
            let empty = row.is_empty();
            drop(row);
            if empty {
                self.table.collect(self.identity);
            }
        }
    }
}
