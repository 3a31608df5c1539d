mod access_table;
mod arbiter;
mod client;
mod lease;
mod lifecycle;
mod open;
mod request;
mod server;
pub mod share;
pub mod share_mode;

pub use access_table::{access_table, is_executable, SMBAccessGrant};
pub use client::{SMBClientTable, SMBOwnerSession, SMBProcessId};
pub use lease::{SMBBreakOutcome, SMBOplockBreak, SMBOplockCoordinator};
pub use open::{SMBOpen, SMBOpenKind, SMBOpenOutcome};
pub use request::{SMBAccessMask, SMBCreateAction, SMBCreateDisposition, SMBOpenRequest, SMBShareModeFlags};
pub use server::{SMBArbiterConfig, SMBOpenArbiter, SMBOpenArbiterBuilder, SMBServerDiagnostics, SMBServerDiagnosticsUpdate};
