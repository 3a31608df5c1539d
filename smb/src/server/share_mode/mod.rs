pub use entry::{SMBDenyMode, SMBEntryRef, SMBOpenMode, SMBOplockLevel, SMBShareModeEntry};
pub use table::{SMBShareModeGuard, SMBShareModeTable};

mod entry;
mod table;
