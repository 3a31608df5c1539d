use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use smb_core::logging::{debug, trace, warn};

use crate::server::client::{SMBClientTable, SMBProcessId};
use crate::server::share::SMBFileIdentity;
use crate::server::share_mode::{SMBEntryRef, SMBOplockLevel, SMBShareModeEntry, SMBShareModeGuard, SMBShareModeTable};

/// A request to give up (part of) an oplock. The holder answers by calling `acknowledge`; dropping it
/// unanswered counts as a failed break.
#[derive(Debug)]
pub struct SMBOplockBreak {
    identity: SMBFileIdentity,
    file_id: u64,
    current: SMBOplockLevel,
    break_to: SMBOplockLevel,
    reply: oneshot::Sender<SMBOplockLevel>,
}

impl SMBOplockBreak {
    pub fn identity(&self) -> SMBFileIdentity {
        self.identity
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn current(&self) -> SMBOplockLevel {
        self.current
    }

    pub fn break_to(&self) -> SMBOplockLevel {
        self.break_to
    }

    /// Acknowledges the break at `level`, which can only lower the lease further. Returns the level
    /// actually reported, or `None` when the requester already gave up waiting.
    pub fn acknowledge(self, level: SMBOplockLevel) -> Option<SMBOplockLevel> {
        let level = level.min(self.break_to);
        self.reply.send(level).ok().map(|_| level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMBBreakOutcome {
    Acknowledged(SMBOplockLevel),
    Failed,
}

/// How a break on one entry ended, after liveness of its owner was taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SMBBreakResolution {
    Broken(SMBOplockLevel),
    OrphanRemoved,
    Unresponsive,
}

#[derive(Debug)]
pub struct SMBOplockCoordinator {
    clients: Arc<SMBClientTable>,
    break_timeout: Duration,
    level2_oplocks: bool,
}

impl SMBOplockCoordinator {
    pub fn new(clients: Arc<SMBClientTable>, break_timeout: Duration, level2_oplocks: bool) -> Self {
        Self {
            clients,
            break_timeout,
            level2_oplocks,
        }
    }

    pub fn break_timeout(&self) -> Duration {
        self.break_timeout
    }

    pub fn break_target(&self, current: SMBOplockLevel) -> SMBOplockLevel {
        match current.is_exclusive() && self.level2_oplocks {
            true => SMBOplockLevel::II,
            false => SMBOplockLevel::None,
        }
    }

    pub fn process_exists(&self, owner: SMBProcessId) -> bool {
        self.clients.process_exists(owner)
    }

    /// Sends a break to the owner of `entry` and waits, bounded by the break timeout, for its answer.
    /// Must not be called with the entry's identity locked.
    pub async fn request_break(&self, identity: SMBFileIdentity, entry: &SMBShareModeEntry, break_to: SMBOplockLevel) -> SMBBreakOutcome {
        let Some(sender) = self.clients.break_sender(entry.owner()) else {
            debug!("no break channel for owner {}", entry.owner());
            return SMBBreakOutcome::Failed;
        };
        let (reply, answer) = oneshot::channel();
        let notification = SMBOplockBreak {
            identity,
            file_id: entry.file_id(),
            current: entry.oplock(),
            break_to,
            reply,
        };
        debug!("breaking {:?} oplock on {} held by {} to {:?}", entry.oplock(), identity, entry.entry_ref(), break_to);
        // A full channel waits for room; only the timeout below gives up on a live owner.
        let delivery = async {
            if sender.send(notification).await.is_err() {
                debug!("break channel for owner {} is closed", entry.owner());
                return None;
            }
            match answer.await {
                Ok(level) => Some(level),
                Err(_) => {
                    debug!("owner {} dropped the break on {} unanswered", entry.owner(), identity);
                    None
                }
            }
        };
        match tokio::time::timeout(self.break_timeout, delivery).await {
            Ok(Some(level)) => SMBBreakOutcome::Acknowledged(level.min(break_to)),
            Ok(None) => SMBBreakOutcome::Failed,
            Err(_) => {
                debug!("break on {} to owner {} timed out after {:?}", identity, entry.owner(), self.break_timeout);
                SMBBreakOutcome::Failed
            }
        }
    }

    /// Breaks the oplock on `entry` with the identity unlocked for the duration of the wait, then
    /// relocks it and applies the outcome to the table.
    pub(crate) async fn break_oplock<'a>(&self, table: &'a SMBShareModeTable, guard: SMBShareModeGuard<'a>, entry: &SMBShareModeEntry, break_to: SMBOplockLevel) -> (SMBShareModeGuard<'a>, SMBBreakResolution) {
        let identity = guard.identity();
        drop(guard);
        let outcome = self.request_break(identity, entry, break_to).await;
        let mut guard = table.lock(identity).await;
        let entry_ref: SMBEntryRef = entry.entry_ref();
        let resolution = match outcome {
            SMBBreakOutcome::Acknowledged(level) => {
                trace!("break on {} acknowledged at {:?}", entry_ref, level);
                let current = guard.find(entry_ref).map(|found| found.oplock());
                if let Some(current) = current {
                    guard.set_oplock(entry_ref, level.min(current));
                }
                SMBBreakResolution::Broken(level)
            }
            SMBBreakOutcome::Failed if !self.clients.process_exists(entry.owner()) => {
                warn!("removing orphaned share mode entry {} on {}: owner is gone", entry_ref, identity);
                guard.remove(entry_ref);
                SMBBreakResolution::OrphanRemoved
            }
            SMBBreakOutcome::Failed => {
                warn!("owner {} is alive but did not answer the break on {}", entry.owner(), identity);
                self.clients.mark_failed_oplock_break(entry.owner());
                SMBBreakResolution::Unresponsive
            }
        };
        (guard, resolution)
    }
}
