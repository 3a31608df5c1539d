//! # SMB Share Modes
//!
//! The open arbitration core of an SMB file server: for every open of a shared file it decides
//! whether the request may proceed next to the handles already open on that file, and it
//! coordinates opportunistic locks (oplocks) across the connections holding them.
//!
//! This crate provides:
//! - **Share-mode table** ([`server::share_mode`]): the per-file list of live opens, locked per
//!   file identity, with snapshot/restore.
//! - **Arbitration** ([`server::SMBOpenArbiter`]): the DOS/Windows deny-mode truth table, oplock
//!   breaks with bounded waits and orphan cleanup, delete-on-close and handle lifetime.
//! - **Storage** ([`server::share`]): the storage backend contract with a local filesystem and an
//!   in-memory implementation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use smb_share_modes::server::{SMBCreateDisposition, SMBOpenArbiterBuilder, SMBOpenRequest};
//! use smb_share_modes::server::share::SMBLocalFileSystem;
//! use smb_share_modes::server::share_mode::{SMBDenyMode, SMBOpenMode};
//!
//! #[tokio::main]
//! async fn main() -> smb_core::SMBResult<()> {
//!     let arbiter = SMBOpenArbiterBuilder::new(SMBLocalFileSystem::new("/srv/share")).build()?;
//!     let session = arbiter.register_owner();
//!     let request = SMBOpenRequest::new(session.process_id(), "report.txt", SMBOpenMode::ReadWrite,
//!         SMBDenyMode::DenyWrite, SMBCreateDisposition::OpenIf);
//!     let mut outcome = arbiter.open_file_shared(&request).await?;
//!     arbiter.close(&mut outcome.open).await
//! }
//! ```

/// Open arbitration: share modes, oplocks, handles and storage backends.
pub mod server;
/// Small helpers shared by the server modules.
pub mod util;
