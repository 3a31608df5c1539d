use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::server::share::{normalize_path, SMBAccessMode, SMBCreateFlags, SMBFileAttributes, SMBFileIdentity, SMBFileMetadata, SMBRangeLockKind, SMBRangeLockTable, StorageBackend};

const MEMORY_DEVICE: u64 = 0x5348;

#[derive(Debug, Clone)]
struct SMBMemoryNode {
    inode: u64,
    size: u64,
    is_directory: bool,
    read_only: bool,
}

impl SMBMemoryNode {
    fn metadata(&self) -> SMBFileMetadata {
        SMBFileMetadata {
            identity: SMBFileIdentity::new(MEMORY_DEVICE, self.inode),
            size: self.size,
            is_directory: self.is_directory,
            read_only: self.read_only,
        }
    }
}

#[derive(Debug, Default)]
struct SMBMemoryState {
    nodes: HashMap<String, SMBMemoryNode>,
    // Unlinked nodes stay reachable through descriptors still open on them.
    orphans: HashMap<u64, SMBMemoryNode>,
    descriptors: HashMap<u64, u64>,
    busy: HashSet<String>,
    next_inode: u64,
    open_calls: u64,
}

impl SMBMemoryState {
    fn node_by_inode(&mut self, inode: u64) -> Option<&mut SMBMemoryNode> {
        if let Some(node) = self.orphans.get_mut(&inode) {
            return Some(node);
        }
        self.nodes.values_mut().find(|node| node.inode == inode)
    }

    fn insert_node(&mut self, path: String, is_directory: bool, size: u64, read_only: bool) -> u64 {
        self.next_inode += 1;
        let inode = self.next_inode;
        self.nodes.insert(path, SMBMemoryNode { inode, size, is_directory, read_only });
        inode
    }
}

#[derive(Debug)]
pub struct SMBMemoryHandle {
    id: u64,
    identity: SMBFileIdentity,
    access: SMBAccessMode,
}

impl SMBMemoryHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> SMBFileIdentity {
        self.identity
    }

    pub fn access(&self) -> SMBAccessMode {
        self.access
    }
}

/// An in-memory namespace with no file contents, only sizes and attributes. Paths can be marked busy
/// to make unlink fail, and the storage counts open calls and live descriptors so callers can check
/// that nothing leaks.
#[derive(Debug, Default)]
pub struct SMBMemoryStorage {
    state: Mutex<SMBMemoryState>,
    next_descriptor: AtomicU64,
    range_locks: SMBRangeLockTable,
}

impl SMBMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SMBMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_file(&self, path: &str, size: u64) -> SMBFileIdentity {
        let inode = self.state().insert_node(normalize_path(path), false, size, false);
        SMBFileIdentity::new(MEMORY_DEVICE, inode)
    }

    pub fn add_directory(&self, path: &str) -> SMBFileIdentity {
        let inode = self.state().insert_node(normalize_path(path), true, 0, false);
        SMBFileIdentity::new(MEMORY_DEVICE, inode)
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) -> bool {
        match self.state().nodes.get_mut(&normalize_path(path)) {
            Some(node) => {
                node.read_only = read_only;
                true
            }
            None => false,
        }
    }

    pub fn set_busy(&self, path: &str, busy: bool) {
        let path = normalize_path(path);
        let mut state = self.state();
        if busy {
            state.busy.insert(path);
        } else {
            state.busy.remove(&path);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(&normalize_path(path))
    }

    pub fn size_of(&self, path: &str) -> Option<u64> {
        self.state().nodes.get(&normalize_path(path)).map(|node| node.size)
    }

    pub fn open_descriptors(&self) -> usize {
        self.state().descriptors.len()
    }

    pub fn open_calls(&self) -> u64 {
        self.state().open_calls
    }

    pub fn range_locks(&self) -> &SMBRangeLockTable {
        &self.range_locks
    }

    fn live_descriptor(&self, descriptor: &SMBMemoryHandle) -> SMBResult<()> {
        match self.state().descriptors.contains_key(&descriptor.id) {
            true => Ok(()),
            false => Err(SMBError::io_error(io::Error::new(io::ErrorKind::InvalidInput, "descriptor is closed"))),
        }
    }
}

impl StorageBackend for SMBMemoryStorage {
    type Descriptor = SMBMemoryHandle;

    fn open(&self, path: &str, access: SMBAccessMode, flags: SMBCreateFlags, attributes: SMBFileAttributes) -> SMBResult<Self::Descriptor> {
        let path = normalize_path(path);
        let mut state = self.state();
        state.open_calls += 1;
        let inode = match state.nodes.get_mut(&path) {
            Some(_) if flags.contains(SMBCreateFlags::EXCLUSIVE | SMBCreateFlags::CREATE) => {
                return Err(SMBError::io_error(io::ErrorKind::AlreadyExists));
            }
            Some(node) => {
                if node.is_directory && access.can_write() {
                    return Err(SMBError::io_error(io::ErrorKind::IsADirectory));
                }
                if node.read_only && access.can_write() {
                    return Err(SMBError::io_error(io::ErrorKind::PermissionDenied));
                }
                if flags.contains(SMBCreateFlags::TRUNCATE) {
                    node.size = 0;
                }
                node.inode
            }
            None if flags.contains(SMBCreateFlags::CREATE) => {
                let read_only = attributes.contains(SMBFileAttributes::READONLY);
                state.insert_node(path, false, 0, read_only)
            }
            None => return Err(SMBError::io_error(io::ErrorKind::NotFound)),
        };
        let id = self.next_descriptor.fetch_add(1, Ordering::SeqCst);
        state.descriptors.insert(id, inode);
        Ok(SMBMemoryHandle {
            id,
            identity: SMBFileIdentity::new(MEMORY_DEVICE, inode),
            access,
        })
    }

    fn stat(&self, path: &str) -> SMBResult<SMBFileMetadata> {
        self.state().nodes.get(&normalize_path(path))
            .map(SMBMemoryNode::metadata)
            .ok_or(SMBError::io_error(io::ErrorKind::NotFound))
    }

    fn fstat(&self, descriptor: &Self::Descriptor) -> SMBResult<SMBFileMetadata> {
        self.live_descriptor(descriptor)?;
        self.state().node_by_inode(descriptor.identity.inode())
            .map(|node| node.metadata())
            .ok_or(SMBError::io_error(io::ErrorKind::NotFound))
    }

    fn truncate(&self, descriptor: &mut Self::Descriptor, length: u64) -> SMBResult<()> {
        self.live_descriptor(descriptor)?;
        if !descriptor.access.can_write() {
            return Err(SMBError::io_error(io::ErrorKind::PermissionDenied));
        }
        let mut state = self.state();
        let node = state.node_by_inode(descriptor.identity.inode())
            .ok_or(SMBError::io_error(io::ErrorKind::NotFound))?;
        node.size = length;
        Ok(())
    }

    fn close(&self, descriptor: Self::Descriptor) -> SMBResult<()> {
        self.range_locks.release_all(descriptor.identity, descriptor.id);
        let mut state = self.state();
        let inode = state.descriptors.remove(&descriptor.id)
            .ok_or(SMBError::io_error(io::Error::new(io::ErrorKind::InvalidInput, "descriptor is closed")))?;
        if !state.descriptors.values().any(|open| *open == inode) {
            state.orphans.remove(&inode);
        }
        Ok(())
    }

    fn lock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64, kind: SMBRangeLockKind) -> SMBResult<()> {
        self.live_descriptor(descriptor)?;
        self.range_locks.lock(descriptor.identity, descriptor.id, offset, length, kind)
    }

    fn unlock_range(&self, descriptor: &Self::Descriptor, offset: u64, length: u64) -> SMBResult<()> {
        self.live_descriptor(descriptor)?;
        self.range_locks.unlock(descriptor.identity, descriptor.id, offset, length)
    }

    fn unlink(&self, path: &str) -> SMBResult<()> {
        let path = normalize_path(path);
        let mut state = self.state();
        if state.busy.contains(&path) {
            return Err(SMBError::io_error(io::ErrorKind::ResourceBusy));
        }
        let node = match state.nodes.get(&path) {
            Some(node) if node.is_directory => return Err(SMBError::io_error(io::ErrorKind::IsADirectory)),
            Some(node) => node.clone(),
            None => return Err(SMBError::io_error(io::ErrorKind::NotFound)),
        };
        state.nodes.remove(&path);
        if state.descriptors.values().any(|open| *open == node.inode) {
            state.orphans.insert(node.inode, node);
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> SMBResult<()> {
        let path = normalize_path(path);
        let mut state = self.state();
        if state.nodes.contains_key(&path) {
            return Err(SMBError::io_error(io::ErrorKind::AlreadyExists));
        }
        state.insert_node(path, true, 0, false);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> SMBResult<()> {
        let path = normalize_path(path);
        let mut state = self.state();
        if state.busy.contains(&path) {
            return Err(SMBError::io_error(io::ErrorKind::ResourceBusy));
        }
        match state.nodes.get(&path) {
            Some(node) if !node.is_directory => return Err(SMBError::io_error(io::ErrorKind::NotADirectory)),
            Some(_) => {}
            None => return Err(SMBError::io_error(io::ErrorKind::NotFound)),
        }
        let prefix = format!("{}/", path);
        if state.nodes.keys().any(|child| child.starts_with(&prefix)) {
            return Err(SMBError::io_error(io::ErrorKind::DirectoryNotEmpty));
        }
        state.nodes.remove(&path);
        Ok(())
    }
}
