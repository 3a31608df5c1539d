use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::server::lease::SMBOplockBreak;

/// Identity of a connection worker that owns opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SMBProcessId(Uuid);

impl SMBProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SMBProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SMBProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug)]
struct SMBClient {
    break_sender: mpsc::Sender<SMBOplockBreak>,
    failed_oplock_break: bool,
}

/// The receiving half of an owner's registration. Break notifications for opens held by this owner
/// arrive here; dropping it makes the owner look dead to everybody else.
#[derive(Debug)]
pub struct SMBOwnerSession {
    process_id: SMBProcessId,
    breaks: mpsc::Receiver<SMBOplockBreak>,
}

impl SMBOwnerSession {
    pub fn process_id(&self) -> SMBProcessId {
        self.process_id
    }

    pub async fn next_break(&mut self) -> Option<SMBOplockBreak> {
        self.breaks.recv().await
    }

    pub fn try_next_break(&mut self) -> Option<SMBOplockBreak> {
        self.breaks.try_recv().ok()
    }
}

#[derive(Debug, Default)]
pub struct SMBClientTable {
    clients: Mutex<HashMap<SMBProcessId, SMBClient>>,
}

impl SMBClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<SMBProcessId, SMBClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, capacity: usize) -> SMBOwnerSession {
        let process_id = SMBProcessId::new();
        let (break_sender, breaks) = mpsc::channel(capacity.max(1));
        self.clients().insert(process_id, SMBClient {
            break_sender,
            failed_oplock_break: false,
        });
        SMBOwnerSession { process_id, breaks }
    }

    pub fn deregister(&self, process_id: SMBProcessId) -> bool {
        self.clients().remove(&process_id).is_some()
    }

    pub fn break_sender(&self, process_id: SMBProcessId) -> Option<mpsc::Sender<SMBOplockBreak>> {
        self.clients().get(&process_id).map(|client| client.break_sender.clone())
    }

    /// An owner is alive while it is registered and still holds its notification receiver.
    pub fn process_exists(&self, process_id: SMBProcessId) -> bool {
        self.clients()
            .get(&process_id)
            .is_some_and(|client| !client.break_sender.is_closed())
    }

    pub fn mark_failed_oplock_break(&self, process_id: SMBProcessId) {
        if let Some(client) = self.clients().get_mut(&process_id) {
            client.failed_oplock_break = true;
        }
    }

    pub fn failed_oplock_break(&self, process_id: SMBProcessId) -> bool {
        self.clients()
            .get(&process_id)
            .is_some_and(|client| client.failed_oplock_break)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }
}
