use smb_core::error::SMBError;
use smb_core::logging::{debug, trace, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::server::client::SMBProcessId;
use crate::server::lease::SMBOplockBreak;
use crate::server::open::SMBOpen;
use crate::server::server::{SMBOpenArbiter, SMBServerDiagnosticsUpdate};
use crate::server::share::{SMBRangeLockKind, StorageBackend};
use crate::server::share_mode::SMBOplockLevel;

impl<B: StorageBackend> SMBOpenArbiter<B> {
    /// Closes a handle. The entry is removed, delete-on-close is honoured for the last closer and the
    /// descriptor is released, all under the file's share-mode lock. Closing twice is a no-op.
    pub async fn close(&self, open: &mut SMBOpen<B>) -> SMBResult<()> {
        let Some(descriptor) = open.begin_close() else {
            trace!("{} already closed", open.entry_ref());
            return Ok(());
        };
        if open.is_stat_open() {
            return Ok(());
        }

        let mut guard = self.table.lock(open.identity()).await;
        let removed = guard.remove(open.entry_ref());
        let last = guard.is_empty();

        if let Some(entry) = &removed {
            if entry.delete_on_close() && last {
                let unlinked = match open.is_directory() {
                    true => self.backend.rmdir(open.path()),
                    false => self.backend.unlink(open.path()),
                };
                match unlinked {
                    Ok(()) => {
                        debug!("deleted {} on close", open.path());
                        self.record(SMBServerDiagnosticsUpdate::default().delete_on_close_unlinks(1));
                    }
                    Err(err) => warn!("delete on close of {} failed: {}", open.path(), err),
                }
            }
        }

        let closed = match descriptor {
            Some(descriptor) => self.backend.close(descriptor),
            None => Ok(()),
        };
        drop(guard);

        if removed.is_some() {
            self.release_slots(1);
        } else {
            debug!("entry {} was already swept before close", open.entry_ref());
        }
        closed
    }

    /// Sets or clears delete-on-close for every open of the handle's file.
    pub async fn set_delete_on_close(&self, open: &mut SMBOpen<B>, delete_on_close: bool) -> SMBResult<()> {
        if open.is_closed() {
            return Err(SMBError::response_error(NTStatus::FileClosed));
        }
        if open.is_stat_open() {
            return Err(SMBError::access_denied(format!("{} was opened for attributes only", open.path())));
        }
        let mut guard = self.table.lock(open.identity()).await;
        if delete_on_close {
            Self::mark_delete_on_close(&mut guard, open.has_delete_access(), open.metadata().read_only, open.path())?;
        } else {
            guard.set_delete_on_close(false);
        }
        open.set_delete_on_close(delete_on_close);
        Ok(())
    }

    pub fn lock_range(&self, open: &SMBOpen<B>, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        let descriptor = Self::live_descriptor(open)?;
        self.backend.lock_range(descriptor, offset, length, kind)
    }

    pub fn unlock_range(&self, open: &SMBOpen<B>, offset: u64, length: u64) -> SMBResult<()> {
        let descriptor = Self::live_descriptor(open)?;
        self.backend.unlock_range(descriptor, offset, length)
    }

    fn live_descriptor(open: &SMBOpen<B>) -> SMBResult<&B::Descriptor> {
        if open.is_closed() {
            return Err(SMBError::response_error(NTStatus::FileClosed));
        }
        open.descriptor()
            .ok_or(SMBError::access_denied(format!("{} has no data descriptor", open.path())))
    }

    /// Answers a break notification for `open` at `level`, which can only lower its lease. Returns the
    /// level the handle now holds.
    pub fn acknowledge_break(&self, open: &mut SMBOpen<B>, notification: SMBOplockBreak, level: SMBOplockLevel) -> SMBOplockLevel {
        let level = level.min(notification.break_to()).min(open.oplock_level());
        open.set_oplock_level(level);
        if notification.acknowledge(level).is_none() {
            debug!("break on {} was answered after the requester gave up", open.entry_ref());
        }
        level
    }

    /// Forgets an owner and removes every share-mode entry it still holds.
    pub async fn disconnect(&self, owner: SMBProcessId) -> usize {
        self.clients.deregister(owner);
        let mut removed = 0;
        for identity in self.table.identities() {
            let mut guard = self.table.lock(identity).await;
            let gone = guard.remove_owned_by(owner);
            if !gone.is_empty() {
                debug!("dropped {} entries of {} on {}", gone.len(), owner, identity);
            }
            removed += gone.len();
        }
        self.release_slots(removed);
        if removed > 0 {
            warn!("owner {} disconnected with {} opens outstanding", owner, removed);
        }
        removed
    }
}
