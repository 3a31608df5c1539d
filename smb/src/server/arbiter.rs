use smb_core::error::SMBError;
use smb_core::logging::{debug, info, trace, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::server::access_table::{check_share_mode, SMBShareRequest};
use crate::server::client::SMBProcessId;
use crate::server::lease::SMBBreakResolution;
use crate::server::open::{SMBOpen, SMBOpenOutcome};
use crate::server::request::{SMBCreateAction, SMBCreateDisposition, SMBOpenRequest};
use crate::server::server::{SMBOpenArbiter, SMBServerDiagnosticsUpdate};
use crate::server::share::{SMBAccessMode, SMBCreateFlags, SMBFileMetadata, SMBRangeLockKind, StorageBackend};
use crate::server::share_mode::{SMBDenyMode, SMBOpenMode, SMBOplockLevel, SMBShareModeEntry, SMBShareModeGuard};

/// Mutable state threaded through the share-mode scan of one open attempt.
#[derive(Debug)]
struct SMBShareCheck {
    access: SMBAccessMode,
    oplock: SMBOplockLevel,
    all_level_two: bool,
    entries: usize,
}

#[derive(Debug)]
struct SMBCommittedOpen {
    metadata: SMBFileMetadata,
    file_id: u64,
    action: SMBCreateAction,
}

/// Whether an existing lease must be broken before a new opener asking for `requested` can proceed.
fn needs_break(requested: SMBOplockLevel, held: SMBOplockLevel) -> bool {
    match held {
        SMBOplockLevel::Exclusive | SMBOplockLevel::Batch => true,
        SMBOplockLevel::II => requested.is_none(),
        SMBOplockLevel::None => false,
    }
}

fn stat_if_exists<B: StorageBackend>(backend: &B, path: &str) -> SMBResult<Option<SMBFileMetadata>> {
    match backend.stat(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.status() == NTStatus::ObjectNameNotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl<B: StorageBackend> SMBOpenArbiter<B> {
    /// Opens a file for `request`, arbitrating against every other open of the same file.
    pub async fn open_file_shared(&self, request: &SMBOpenRequest) -> SMBResult<SMBOpenOutcome<B>> {
        self.ensure_registered(request.owner())?;
        let slot = self.reserve_slot()?;
        let path = request.path();
        let disposition = request.disposition();

        let mut oplock = request.oplock();
        if !self.config.oplocks || self.clients.failed_oplock_break(request.owner()) {
            oplock = SMBOplockLevel::None;
        }

        let existing = stat_if_exists(&*self.backend, path)?;
        if existing.as_ref().is_some_and(|metadata| metadata.is_directory) {
            return Err(SMBError::response_error((NTStatus::FileIsADirectory, format!("{} is a directory", path))));
        }
        if existing.is_some() && disposition.fails_if_exists() {
            debug!("{} exists and the request must create it", path);
            return Err(SMBError::name_collision(format!("{} already exists", path)));
        }

        let writable_share = !self.config.read_only;
        let mut create = SMBCreateFlags::empty();
        if writable_share && disposition.creates() {
            create |= SMBCreateFlags::CREATE;
            if disposition.fails_if_exists() {
                create |= SMBCreateFlags::EXCLUSIVE;
            }
        }
        let truncate = writable_share && disposition.truncates();

        let fcb = request.open_mode() == SMBOpenMode::Fcb;
        let mut access = request.open_mode().access_mode();
        let read_only_target = self.config.read_only || existing.as_ref().is_some_and(|metadata| metadata.read_only);
        if access.can_write() && read_only_target {
            if !fcb {
                debug!("write access to read-only {} refused", path);
                self.record(SMBServerDiagnosticsUpdate::default().permission_errors(1));
                return Err(SMBError::access_denied(format!("{} is read-only", path)));
            }
            access = SMBAccessMode::ReadOnly;
        }

        let mut state = SMBShareCheck {
            access,
            oplock,
            all_level_two: false,
            entries: 0,
        };

        let mut guard: Option<SMBShareModeGuard<'_>> = None;
        if let Some(metadata) = &existing {
            let locked = self.table.lock(metadata.identity).await;
            match self.open_mode_check(locked, request, fcb, &mut state).await {
                Ok(locked) => guard = Some(locked),
                Err(err) => return Err(self.access_error_precedence(request, state.access, err)),
            }
        }

        let physical = match state.access == SMBAccessMode::ReadOnly && truncate {
            true => SMBAccessMode::ReadWrite,
            false => state.access,
        };
        let mut descriptor = match self.backend.open(path, physical, create, request.attributes()) {
            Ok(descriptor) => descriptor,
            Err(err) if fcb && physical == SMBAccessMode::ReadWrite && err.status() == NTStatus::AccessDenied => {
                trace!("fcb open of {} retrying read-only", path);
                let descriptor = self.backend.open(path, SMBAccessMode::ReadOnly, create, request.attributes())?;
                state.access = SMBAccessMode::ReadOnly;
                descriptor
            }
            Err(err) => {
                if err.status() == NTStatus::AccessDenied {
                    self.record(SMBServerDiagnosticsUpdate::default().permission_errors(1));
                }
                return Err(err);
            }
        };

        match self.finish_open(request, &mut guard, &mut descriptor, &mut state, existing.is_some(), truncate).await {
            Ok(committed) => {
                slot.commit();
                self.record(SMBServerDiagnosticsUpdate::default().file_opens(1));
                info!("{} opened {} as {:?} ({:?}, oplock {:?})", request.owner(), path, state.access, committed.action, state.oplock);
                let mut open = SMBOpen::file(committed.file_id, request.owner(), path, descriptor, committed.metadata,
                    request.attributes(), state.access, request.delete_access_requested(), state.oplock);
                open.set_delete_on_close(request.wants_delete_on_close());
                drop(guard);
                Ok(SMBOpenOutcome { open, action: committed.action })
            }
            Err(err) => {
                if let Err(close_err) = self.backend.close(descriptor) {
                    warn!("closing descriptor of failed open on {}: {}", path, close_err);
                }
                drop(guard);
                Err(err)
            }
        }
    }

    /// Everything after the physical open that can still fail: the re-check of a file that appeared
    /// concurrently, truncation, the lease decision and the commit of the entry. Leaves `guard` locked.
    async fn finish_open<'a>(&'a self, request: &SMBOpenRequest, guard: &mut Option<SMBShareModeGuard<'a>>, descriptor: &mut B::Descriptor, state: &mut SMBShareCheck, existed: bool, truncate: bool) -> SMBResult<SMBCommittedOpen> {
        let path = request.path();
        let mut metadata = self.backend.fstat(descriptor)?;
        if metadata.is_directory {
            return Err(SMBError::response_error((NTStatus::FileIsADirectory, format!("{} is a directory", path))));
        }

        let mut existed = existed;
        if guard.is_none() {
            let locked = self.table.lock(metadata.identity).await;
            let locked = self.open_mode_check(locked, request, request.open_mode() == SMBOpenMode::Fcb, state).await?;
            if state.entries > 0 {
                debug!("{} was created concurrently, rechecked against {} entries", path, state.entries);
                existed = true;
            }
            *guard = Some(locked);
        }
        let Some(locked) = guard.as_mut() else {
            return Err(SMBError::server_error("share mode row is not locked"));
        };

        if truncate && existed {
            self.truncate_unless_locked(descriptor)?;
            metadata = self.backend.fstat(descriptor)?;
        }

        let action = match (existed, truncate) {
            (false, _) => SMBCreateAction::Created,
            (true, false) => SMBCreateAction::Opened,
            (true, true) if request.disposition() == SMBCreateDisposition::Supersede => SMBCreateAction::Superseded,
            (true, true) => SMBCreateAction::Overwritten,
        };

        state.oplock = self.grant_oplock(path, state);

        let file_id = self.next_file_id();
        let entry = SMBShareModeEntry::new(request.owner(), file_id, SMBOpenMode::from(state.access), request.deny_mode())
            .with_delete_sharing(request.shares_delete(), request.delete_access_requested())
            .with_oplock(state.oplock);
        let entry_ref = entry.entry_ref();
        locked.insert(entry);

        if request.wants_delete_on_close() {
            if let Err(err) = Self::mark_delete_on_close(locked, request.delete_access_requested(), metadata.read_only, path) {
                locked.remove(entry_ref);
                return Err(err);
            }
        }
        Ok(SMBCommittedOpen { metadata, file_id, action })
    }

    fn grant_oplock(&self, path: &str, state: &SMBShareCheck) -> SMBOplockLevel {
        if state.oplock.is_none() {
            return SMBOplockLevel::None;
        }
        if state.entries == 0 {
            if state.oplock.is_exclusive() && self.is_veto_oplock_path(path) {
                debug!("oplocks vetoed on {}", path);
                return SMBOplockLevel::None;
            }
            return state.oplock;
        }
        match state.all_level_two {
            true => SMBOplockLevel::II,
            false => SMBOplockLevel::None,
        }
    }

    /// Scans the entries of a locked file, breaking leases that stand in the way and checking share
    /// modes against the rest. Restarts the scan after every break.
    async fn open_mode_check<'a>(&'a self, mut guard: SMBShareModeGuard<'a>, request: &SMBOpenRequest, fcb: bool, state: &mut SMBShareCheck) -> SMBResult<SMBShareModeGuard<'a>> {
        let share_request = SMBShareRequest {
            owner: request.owner(),
            path: request.path(),
            deny_mode: request.deny_mode(),
            fcb,
            allow_share_delete: request.shares_delete(),
            delete_access_requested: request.delete_access_requested(),
        };

        state.entries = guard.len();
        if guard.is_empty() {
            return Ok(guard);
        }

        let mut contention = 0u32;
        loop {
            let entries = guard.entries().to_vec();
            let mut broken: Option<SMBShareModeEntry> = None;
            state.all_level_two = true;

            for entry in entries {
                if needs_break(state.oplock, entry.oplock()) {
                    let break_to = self.coordinator.break_target(entry.oplock());
                    let (relocked, resolution) = self.coordinator.break_oplock(&self.table, guard, &entry, break_to).await;
                    guard = relocked;
                    match resolution {
                        SMBBreakResolution::Broken(_) => {
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_sent(1));
                        }
                        SMBBreakResolution::OrphanRemoved => {
                            self.release_slots(1);
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_failed(1).orphans_removed(1));
                        }
                        SMBBreakResolution::Unresponsive => {
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_failed(1).sharing_violations(1));
                            return Err(SMBError::sharing_violation(format!("oplock break on {} was not answered", request.path())));
                        }
                    }
                    broken = Some(entry);
                    break;
                }

                if !entry.oplock().is_level_two() {
                    state.all_level_two = false;
                }

                if self.config.share_modes {
                    if let Err(err) = check_share_mode(&entry, &share_request, &mut state.access) {
                        if err.is_sharing_violation() {
                            self.record(SMBServerDiagnosticsUpdate::default().sharing_violations(1));
                        }
                        return Err(err);
                    }
                }
            }

            let Some(broken) = broken else {
                break;
            };
            contention += 1;

            let still_exclusive = guard.find(broken.entry_ref()).is_some_and(|entry| entry.oplock().is_exclusive());
            if still_exclusive {
                warn!("entry {} still holds {:?} after its break, removing it (owner alive: {})",
                    broken.entry_ref(), broken.oplock(), self.coordinator.process_exists(broken.owner()));
                if guard.remove(broken.entry_ref()).is_some() {
                    self.release_slots(1);
                }
            }
        }

        state.entries = guard.len();
        if contention >= self.config.oplock_contention_limit && !state.oplock.is_none() {
            debug!("{} break cycles opening {}, granting no oplock", contention, request.path());
            state.oplock = SMBOplockLevel::None;
        }
        Ok(guard)
    }

    /// A share-mode failure is reported as an access error instead when the caller could not have
    /// opened the file anyway.
    fn access_error_precedence(&self, request: &SMBOpenRequest, access: SMBAccessMode, err: SMBError) -> SMBError {
        if !err.is_sharing_violation() {
            return err;
        }
        match self.backend.open(request.path(), access, SMBCreateFlags::empty(), request.attributes()) {
            Ok(probe) => {
                if let Err(close_err) = self.backend.close(probe) {
                    warn!("closing access probe on {}: {}", request.path(), close_err);
                }
                err
            }
            Err(probe_err) if probe_err.status() == NTStatus::AccessDenied => {
                self.record(SMBServerDiagnosticsUpdate::default().permission_errors(1));
                probe_err
            }
            Err(_) => err,
        }
    }

    /// Truncates to zero unless another descriptor holds a conflicting byte-range lock.
    fn truncate_unless_locked(&self, descriptor: &mut B::Descriptor) -> SMBResult<()> {
        self.backend.lock_range(descriptor, 0, u64::MAX, SMBRangeLockKind::Write)?;
        self.backend.unlock_range(descriptor, 0, u64::MAX)?;
        self.backend.truncate(descriptor, 0)
    }

    pub(crate) fn mark_delete_on_close(guard: &mut SMBShareModeGuard<'_>, delete_access: bool, read_only: bool, path: &str) -> SMBResult<()> {
        if read_only {
            return Err(SMBError::access_denied(format!("{} is read-only and cannot be deleted", path)));
        }
        if !delete_access {
            return Err(SMBError::access_denied(format!("delete on close of {} needs delete access", path)));
        }
        guard.set_delete_on_close(true);
        Ok(())
    }

    /// Opens (or creates) a directory. Directory handles carry no descriptor and no lease.
    pub async fn open_directory(&self, request: &SMBOpenRequest) -> SMBResult<SMBOpenOutcome<B>> {
        self.ensure_registered(request.owner())?;
        let slot = self.reserve_slot()?;
        let path = request.path();
        let disposition = request.disposition();

        let existing = stat_if_exists(&*self.backend, path)?;
        if existing.is_some() && disposition.fails_if_exists() {
            return Err(SMBError::name_collision(format!("{} already exists", path)));
        }

        let (metadata, action) = match existing {
            Some(metadata) if !metadata.is_directory => {
                return Err(SMBError::response_error((NTStatus::NotADirectory, format!("{} is not a directory", path))));
            }
            Some(metadata) => (metadata, SMBCreateAction::Opened),
            None if disposition.creates() => {
                if self.config.read_only {
                    self.record(SMBServerDiagnosticsUpdate::default().permission_errors(1));
                    return Err(SMBError::access_denied(format!("cannot create {} on a read-only share", path)));
                }
                self.backend.mkdir(path)?;
                (self.backend.stat(path)?, SMBCreateAction::Created)
            }
            None => return Err(SMBError::io_error(std::io::ErrorKind::NotFound)),
        };

        let mut guard = self.table.lock(metadata.identity).await;
        if guard.entries().iter().any(SMBShareModeEntry::delete_on_close) {
            return Err(SMBError::access_denied(format!("{} is pending deletion", path)));
        }

        let file_id = self.next_file_id();
        let entry = SMBShareModeEntry::new(request.owner(), file_id, SMBOpenMode::ReadOnly, request.deny_mode())
            .with_delete_sharing(request.shares_delete(), request.delete_access_requested());
        let entry_ref = entry.entry_ref();
        guard.insert(entry);

        let mut open = SMBOpen::directory(file_id, request.owner(), path, metadata, request.delete_access_requested());
        if request.wants_delete_on_close() {
            if let Err(err) = Self::mark_delete_on_close(&mut guard, request.delete_access_requested(), false, path) {
                guard.remove(entry_ref);
                return Err(err);
            }
            open.set_delete_on_close(true);
        }
        drop(guard);

        slot.commit();
        self.record(SMBServerDiagnosticsUpdate::default().directory_opens(1));
        info!("{} opened directory {} ({:?})", request.owner(), path, action);
        Ok(SMBOpenOutcome { open, action })
    }

    /// Opens a file for attribute queries only: no descriptor, no share-mode entry.
    pub async fn open_stat(&self, owner: SMBProcessId, path: &str) -> SMBResult<SMBOpenOutcome<B>> {
        self.ensure_registered(owner)?;
        let metadata = self.backend.stat(path)?;
        if metadata.is_directory {
            return Err(SMBError::response_error((NTStatus::FileIsADirectory, format!("{} is a directory", path))));
        }
        trace!("{} stat-opened {}", owner, path);
        Ok(SMBOpenOutcome {
            open: SMBOpen::stat(self.next_file_id(), owner, path, metadata),
            action: SMBCreateAction::Opened,
        })
    }

    /// Decides whether `path` may be deleted (or renamed) by `owner` given its current opens. Batch
    /// oplocks are broken first, since their holders may only be caching a closed handle.
    pub async fn check_file_sharing(&self, owner: SMBProcessId, path: &str, rename: bool) -> SMBResult<()> {
        let Some(metadata) = stat_if_exists(&*self.backend, path)? else {
            return Ok(());
        };
        let mut guard = self.table.lock(metadata.identity).await;
        'scan: loop {
            for entry in guard.entries().to_vec() {
                if entry.oplock() == SMBOplockLevel::Batch {
                    let break_to = self.coordinator.break_target(entry.oplock());
                    let (relocked, resolution) = self.coordinator.break_oplock(&self.table, guard, &entry, break_to).await;
                    guard = relocked;
                    match resolution {
                        SMBBreakResolution::Broken(_) => {
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_sent(1));
                        }
                        SMBBreakResolution::OrphanRemoved => {
                            self.release_slots(1);
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_failed(1).orphans_removed(1));
                        }
                        SMBBreakResolution::Unresponsive => {
                            self.record(SMBServerDiagnosticsUpdate::default().oplock_breaks_failed(1).sharing_violations(1));
                            return Err(SMBError::sharing_violation(format!("oplock break on {} was not answered", path)));
                        }
                    }
                    continue 'scan;
                }
                if !rename && entry.allow_share_delete() {
                    continue;
                }
                if entry.deny_mode() != SMBDenyMode::DenyDos || entry.owner() != owner {
                    debug!("{} of {} refused, open {} deny {:?}", if rename { "rename" } else { "delete" }, path, entry.entry_ref(), entry.deny_mode());
                    self.record(SMBServerDiagnosticsUpdate::default().sharing_violations(1));
                    return Err(SMBError::sharing_violation(format!("{} is in use", path)));
                }
            }
            return Ok(());
        }
    }

    /// Deletes `path` if its current opens allow it.
    pub async fn unlink(&self, owner: SMBProcessId, path: &str) -> SMBResult<()> {
        self.ensure_registered(owner)?;
        self.check_file_sharing(owner, path, false).await?;
        self.backend.unlink(path)
    }
}
