use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::{error, info, warn};
use smb_core::SMBResult;

use crate::server::client::{SMBClientTable, SMBOwnerSession, SMBProcessId};
use crate::server::lease::SMBOplockCoordinator;
use crate::server::share::{SMBFileIdentity, StorageBackend};
use crate::server::share_mode::{SMBShareModeEntry, SMBShareModeTable};
use crate::util::name_match::is_in_path;

const BREAK_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBArbiterConfig {
    pub oplocks: bool,
    pub level2_oplocks: bool,
    pub share_modes: bool,
    pub read_only: bool,
    pub oplock_contention_limit: u32,
    pub oplock_break_timeout: Duration,
    pub veto_oplock_paths: Vec<String>,
    pub max_open_files: usize,
}

impl Default for SMBArbiterConfig {
    fn default() -> Self {
        Self {
            oplocks: true,
            level2_oplocks: true,
            share_modes: true,
            read_only: false,
            oplock_contention_limit: 2,
            oplock_break_timeout: Duration::from_secs(30),
            veto_oplock_paths: Vec::new(),
            max_open_files: 10000,
        }
    }
}

/// Decides every open against a share: share-mode compatibility, oplock grants and breaks, and the
/// lifetime of the resulting handles.
#[derive(Debug)]
pub struct SMBOpenArbiter<B: StorageBackend> {
    pub(crate) backend: Arc<B>,
    pub(crate) config: SMBArbiterConfig,
    pub(crate) table: Arc<SMBShareModeTable>,
    pub(crate) clients: Arc<SMBClientTable>,
    pub(crate) coordinator: SMBOplockCoordinator,
    next_file_id: AtomicU64,
    open_count: AtomicUsize,
    statistics: Mutex<SMBServerDiagnostics>,
}

pub struct SMBOpenArbiterBuilder<B: StorageBackend> {
    backend: Arc<B>,
    config: SMBArbiterConfig,
    table: Option<Arc<SMBShareModeTable>>,
    clients: Option<Arc<SMBClientTable>>,
}

impl<B: StorageBackend> SMBOpenArbiterBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self::shared(Arc::new(backend))
    }

    pub fn shared(backend: Arc<B>) -> Self {
        Self {
            backend,
            config: SMBArbiterConfig::default(),
            table: None,
            clients: None,
        }
    }

    pub fn config(mut self, config: SMBArbiterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn oplocks(mut self, oplocks: bool) -> Self {
        self.config.oplocks = oplocks;
        self
    }

    pub fn level2_oplocks(mut self, level2_oplocks: bool) -> Self {
        self.config.level2_oplocks = level2_oplocks;
        self
    }

    pub fn share_modes(mut self, share_modes: bool) -> Self {
        self.config.share_modes = share_modes;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn oplock_contention_limit(mut self, oplock_contention_limit: u32) -> Self {
        self.config.oplock_contention_limit = oplock_contention_limit;
        self
    }

    pub fn oplock_break_timeout(mut self, oplock_break_timeout: Duration) -> Self {
        self.config.oplock_break_timeout = oplock_break_timeout;
        self
    }

    pub fn veto_oplock_path<S: Into<String>>(mut self, pattern: S) -> Self {
        self.config.veto_oplock_paths.push(pattern.into());
        self
    }

    pub fn max_open_files(mut self, max_open_files: usize) -> Self {
        self.config.max_open_files = max_open_files;
        self
    }

    /// Starts from an existing (for example restored) share-mode table.
    pub fn table(mut self, table: Arc<SMBShareModeTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Shares owner registrations with another arbiter.
    pub fn clients(mut self, clients: Arc<SMBClientTable>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn build(self) -> SMBResult<SMBOpenArbiter<B>> {
        if self.config.oplock_contention_limit == 0 {
            return Err(SMBError::precondition_failed("oplock contention limit must be at least 1"));
        }
        if self.config.oplock_break_timeout.is_zero() {
            return Err(SMBError::precondition_failed("oplock break timeout must be non-zero"));
        }
        if self.config.max_open_files == 0 {
            return Err(SMBError::precondition_failed("max open files must be at least 1"));
        }
        let clients = self.clients.unwrap_or_default();
        let coordinator = SMBOplockCoordinator::new(clients.clone(), self.config.oplock_break_timeout, self.config.level2_oplocks);
        info!("arbiter configured: {:?}", self.config);
        Ok(SMBOpenArbiter {
            backend: self.backend,
            config: self.config,
            table: self.table.unwrap_or_default(),
            clients,
            coordinator,
            next_file_id: AtomicU64::new(1),
            open_count: AtomicUsize::new(0),
            statistics: Mutex::new(SMBServerDiagnostics::new()),
        })
    }
}

impl<B: StorageBackend> SMBOpenArbiter<B> {
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SMBArbiterConfig {
        &self.config
    }

    pub fn table(&self) -> &SMBShareModeTable {
        &self.table
    }

    pub fn clients(&self) -> &SMBClientTable {
        &self.clients
    }

    pub fn register_owner(&self) -> SMBOwnerSession {
        self.clients.register(BREAK_CHANNEL_CAPACITY)
    }

    pub fn process_exists(&self, owner: SMBProcessId) -> bool {
        self.clients.process_exists(owner)
    }

    pub fn open_files(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub async fn share_mode_entries(&self, identity: SMBFileIdentity) -> Vec<SMBShareModeEntry> {
        self.table.entries(identity).await
    }

    /// Entries registered on whatever `path` currently names.
    pub async fn share_modes(&self, path: &str) -> SMBResult<Vec<SMBShareModeEntry>> {
        let metadata = self.backend.stat(path)?;
        Ok(self.table.entries(metadata.identity).await)
    }

    pub fn diagnostics(&self) -> SMBServerDiagnostics {
        self.statistics().clone()
    }

    fn statistics(&self) -> MutexGuard<'_, SMBServerDiagnostics> {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record(&self, update: SMBServerDiagnosticsUpdate) {
        self.statistics().apply_update(update);
    }

    pub(crate) fn ensure_registered(&self, owner: SMBProcessId) -> SMBResult<()> {
        match self.clients.process_exists(owner) {
            true => Ok(()),
            false => Err(SMBError::server_error(format!("owner {} is not registered", owner))),
        }
    }

    pub(crate) fn next_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn reserve_slot(&self) -> SMBResult<SMBOpenSlot<'_>> {
        let previous = self.open_count.fetch_add(1, Ordering::SeqCst);
        if previous >= self.config.max_open_files {
            self.open_count.fetch_sub(1, Ordering::SeqCst);
            error!("open file limit of {} reached", self.config.max_open_files);
            return Err(SMBError::resource_exhaustion(format!("too many open files ({})", self.config.max_open_files)));
        }
        Ok(SMBOpenSlot { count: &self.open_count, committed: false })
    }

    pub(crate) fn release_slots(&self, slots: usize) {
        let _ = self.open_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| Some(count.saturating_sub(slots)));
    }

    pub(crate) fn is_veto_oplock_path(&self, path: &str) -> bool {
        is_in_path(path, &self.config.veto_oplock_paths)
    }

    pub async fn snapshot(&self) -> SMBResult<Vec<u8>> {
        self.table.snapshot().await
    }

    /// Removes every entry whose owner is no longer alive, as after restoring a snapshot taken
    /// before a worker crashed.
    pub async fn sweep_dead_owners(&self) -> usize {
        let mut removed = 0;
        for identity in self.table.identities() {
            let mut guard = self.table.lock(identity).await;
            let dead: Vec<SMBProcessId> = guard.entries()
                .iter()
                .map(SMBShareModeEntry::owner)
                .filter(|owner| !self.clients.process_exists(*owner))
                .collect();
            for owner in dead {
                let gone = guard.remove_owned_by(owner);
                if !gone.is_empty() {
                    warn!("swept {} entries of dead owner {} from {}", gone.len(), owner, identity);
                }
                removed += gone.len();
            }
        }
        self.release_slots(removed);
        self.record(SMBServerDiagnosticsUpdate::default().orphans_removed(removed as u64));
        removed
    }
}

/// A reserved handle slot, given back on drop unless the open it guards succeeded.
#[derive(Debug)]
pub(crate) struct SMBOpenSlot<'a> {
    count: &'a AtomicUsize,
    committed: bool,
}

impl SMBOpenSlot<'_> {
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SMBOpenSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Builder)]
#[builder(name = "SMBServerDiagnosticsUpdate", pattern = "owned")]
#[builder(build_fn(skip))]
pub struct SMBServerDiagnostics {
    file_opens: u64,
    directory_opens: u64,
    sharing_violations: u64,
    permission_errors: u64,
    oplock_breaks_sent: u64,
    oplock_breaks_failed: u64,
    orphans_removed: u64,
    delete_on_close_unlinks: u64,
}

impl SMBServerDiagnostics {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn apply_update(&mut self, mut update: SMBServerDiagnosticsUpdate) {
        if let Some(file_opens) = update.file_opens.take() {
            self.file_opens += file_opens;
        }
        if let Some(directory_opens) = update.directory_opens.take() {
            self.directory_opens += directory_opens;
        }
        if let Some(sharing_violations) = update.sharing_violations.take() {
            self.sharing_violations += sharing_violations;
        }
        if let Some(permission_errors) = update.permission_errors.take() {
            self.permission_errors += permission_errors;
        }
        if let Some(oplock_breaks_sent) = update.oplock_breaks_sent.take() {
            self.oplock_breaks_sent += oplock_breaks_sent;
        }
        if let Some(oplock_breaks_failed) = update.oplock_breaks_failed.take() {
            self.oplock_breaks_failed += oplock_breaks_failed;
        }
        if let Some(orphans_removed) = update.orphans_removed.take() {
            self.orphans_removed += orphans_removed;
        }
        if let Some(delete_on_close_unlinks) = update.delete_on_close_unlinks.take() {
            self.delete_on_close_unlinks += delete_on_close_unlinks;
        }
    }

    pub fn file_opens(&self) -> u64 {
        self.file_opens
    }

    pub fn directory_opens(&self) -> u64 {
        self.directory_opens
    }

    pub fn sharing_violations(&self) -> u64 {
        self.sharing_violations
    }

    pub fn permission_errors(&self) -> u64 {
        self.permission_errors
    }

    pub fn oplock_breaks_sent(&self) -> u64 {
        self.oplock_breaks_sent
    }

    pub fn oplock_breaks_failed(&self) -> u64 {
        self.oplock_breaks_failed
    }

    pub fn orphans_removed(&self) -> u64 {
        self.orphans_removed
    }

    pub fn delete_on_close_unlinks(&self) -> u64 {
        self.delete_on_close_unlinks
    }
}

#[cfg(test)]
mod tests {
    use crate::server::share::SMBMemoryStorage;

    use super::*;

    #[test]
    fn config_defaults() {
        let config = SMBArbiterConfig::default();
        assert!(config.oplocks && config.level2_oplocks && config.share_modes);
        assert!(!config.read_only);
        assert_eq!(config.oplock_contention_limit, 2);
        assert_eq!(config.oplock_break_timeout, Duration::from_secs(30));
        assert_eq!(config.max_open_files, 10000);
    }

    #[test]
    fn builder_rejects_degenerate_limits() {
        assert!(SMBOpenArbiterBuilder::new(SMBMemoryStorage::new()).oplock_contention_limit(0).build().is_err());
        assert!(SMBOpenArbiterBuilder::new(SMBMemoryStorage::new()).oplock_break_timeout(Duration::ZERO).build().is_err());
        assert!(SMBOpenArbiterBuilder::new(SMBMemoryStorage::new()).max_open_files(0).build().is_err());
    }

    #[test]
    fn slots_are_returned_unless_committed() {
        let arbiter = SMBOpenArbiterBuilder::new(SMBMemoryStorage::new()).max_open_files(1).build().unwrap();
        {
            let _slot = arbiter.reserve_slot().unwrap();
            assert_eq!(arbiter.open_files(), 1);
            assert!(arbiter.reserve_slot().is_err());
        }
        assert_eq!(arbiter.open_files(), 0);
        arbiter.reserve_slot().unwrap().commit();
        assert_eq!(arbiter.open_files(), 1);
        arbiter.release_slots(1);
        assert_eq!(arbiter.open_files(), 0);
    }

    #[test]
    fn diagnostics_accumulate() {
        let mut diagnostics = SMBServerDiagnostics::new();
        diagnostics.apply_update(SMBServerDiagnosticsUpdate::default().file_opens(2).sharing_violations(1));
        diagnostics.apply_update(SMBServerDiagnosticsUpdate::default().file_opens(1));
        assert_eq!(diagnostics.file_opens(), 3);
        assert_eq!(diagnostics.sharing_violations(), 1);
        assert_eq!(diagnostics.oplock_breaks_sent(), 0);
    }

    #[test]
    fn veto_paths_match_names() {
        let arbiter = SMBOpenArbiterBuilder::new(SMBMemoryStorage::new())
            .veto_oplock_path("*.mdb")
            .build()
            .unwrap();
        assert!(arbiter.is_veto_oplock_path("db/orders.MDB"));
        assert!(!arbiter.is_veto_oplock_path("db/orders.txt"));
    }
}
