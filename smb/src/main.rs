use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use smb_share_modes::server::{SMBCreateDisposition, SMBOpenArbiterBuilder, SMBOpenRequest};
use smb_share_modes::server::share::SMBLocalFileSystem;
use smb_share_modes::server::share_mode::{SMBDenyMode, SMBOpenMode, SMBOplockLevel};

const FILE_NAME: &str = "foo.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let root = std::env::var("SMB_SHARE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("smb_share_modes"));
    std::fs::create_dir_all(&root)?;

    let arbiter = Arc::new(SMBOpenArbiterBuilder::new(SMBLocalFileSystem::new(&root))
        .oplock_break_timeout(Duration::from_secs(2))
        .build()?);

    let mut writer = arbiter.register_owner();
    let reader = arbiter.register_owner();

    let request = SMBOpenRequest::new(writer.process_id(), FILE_NAME, SMBOpenMode::ReadWrite, SMBDenyMode::DenyWrite, SMBCreateDisposition::OpenIf)
        .with_oplock(SMBOplockLevel::Exclusive);
    let outcome = arbiter.open_file_shared(&request).await?;
    println!("writer: {:?}, oplock {:?}", outcome.action, outcome.open.oplock_level());
    let writer_open = Arc::new(Mutex::new(outcome.into_open()));

    let breaks = {
        let arbiter = arbiter.clone();
        let writer_open = writer_open.clone();
        tokio::spawn(async move {
            while let Some(notification) = writer.next_break().await {
                let mut open = writer_open.lock().await;
                let level = arbiter.acknowledge_break(&mut open, notification, SMBOplockLevel::II);
                println!("writer acknowledged break, now holds {:?}", level);
            }
        })
    };

    let request = SMBOpenRequest::new(reader.process_id(), FILE_NAME, SMBOpenMode::ReadOnly, SMBDenyMode::DenyNone, SMBCreateDisposition::Open);
    let mut reader_open = arbiter.open_file_shared(&request).await?.into_open();
    println!("reader: can read {}, can write {}", reader_open.can_read(), reader_open.can_write());

    let request = SMBOpenRequest::new(reader.process_id(), FILE_NAME, SMBOpenMode::ReadWrite, SMBDenyMode::DenyAll, SMBCreateDisposition::Open);
    match arbiter.open_file_shared(&request).await {
        Ok(_) => println!("exclusive open unexpectedly succeeded"),
        Err(err) => println!("exclusive open refused: {}", err),
    }

    for entry in arbiter.share_modes(FILE_NAME).await? {
        println!("entry {}: {:?} {:?} {:?}", entry.entry_ref(), entry.open_mode(), entry.deny_mode(), entry.oplock());
    }

    arbiter.close(&mut *writer_open.lock().await).await?;
    arbiter.close(&mut reader_open).await?;
    arbiter.disconnect(reader.process_id()).await;
    breaks.abort();

    println!("{:?}", arbiter.diagnostics());
    Ok(())
}
