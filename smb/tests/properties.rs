use std::time::Duration;

use proptest::prelude::*;

use smb_share_modes::server::{access_table, is_executable, SMBAccessGrant, SMBCreateDisposition, SMBOpen, SMBOpenArbiterBuilder, SMBOpenRequest, SMBOwnerSession};
use smb_share_modes::server::share::SMBMemoryStorage;
use smb_share_modes::server::share_mode::{SMBDenyMode, SMBOpenMode, SMBOplockLevel, SMBShareModeEntry};

const PATH: &str = "shared.txt";

#[derive(Debug, Clone)]
enum Step {
    Open { owner: usize, mode: SMBOpenMode, deny: SMBDenyMode, oplock: SMBOplockLevel },
    Close(usize),
}

fn open_mode() -> impl Strategy<Value = SMBOpenMode> {
    prop_oneof![
        Just(SMBOpenMode::ReadOnly),
        Just(SMBOpenMode::WriteOnly),
        Just(SMBOpenMode::ReadWrite),
        Just(SMBOpenMode::Fcb),
    ]
}

fn deny_mode() -> impl Strategy<Value = SMBDenyMode> {
    prop_oneof![
        Just(SMBDenyMode::DenyDos),
        Just(SMBDenyMode::DenyAll),
        Just(SMBDenyMode::DenyWrite),
        Just(SMBDenyMode::DenyRead),
        Just(SMBDenyMode::DenyNone),
        Just(SMBDenyMode::DenyFcb),
    ]
}

fn oplock_level() -> impl Strategy<Value = SMBOplockLevel> {
    prop_oneof![
        Just(SMBOplockLevel::None),
        Just(SMBOplockLevel::II),
        Just(SMBOplockLevel::Exclusive),
        Just(SMBOplockLevel::Batch),
    ]
}

/// How an owner answers breaks: at some level, or by dropping the notification.
fn break_answer() -> impl Strategy<Value = Option<SMBOplockLevel>> {
    prop::option::of(oplock_level())
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..3usize, open_mode(), deny_mode(), oplock_level()).prop_map(|(owner, mode, deny, oplock)| Step::Open { owner, mode, deny, oplock }),
        1 => (0..8usize).prop_map(Step::Close),
    ]
}

fn permits(grant: SMBAccessGrant, mode: SMBOpenMode) -> bool {
    match grant {
        SMBAccessGrant::GrantAll => true,
        SMBAccessGrant::GrantReadOnly => mode == SMBOpenMode::ReadOnly,
        SMBAccessGrant::GrantWriteOnly => mode == SMBOpenMode::WriteOnly,
        SMBAccessGrant::Fail => false,
    }
}

/// Every entry must have been admissible next to each entry registered before it.
fn assert_compatible(entries: &[SMBShareModeEntry]) {
    for (position, later) in entries.iter().enumerate() {
        for earlier in &entries[..position] {
            let grant = access_table(later.deny_mode(), earlier.deny_mode(), earlier.open_mode(),
                later.owner() == earlier.owner(), is_executable(PATH));
            assert!(permits(grant, later.open_mode()), "{:?} admitted next to {:?} ({:?})", later, earlier, grant);
        }
    }
}

/// Services the breaks sent to one owner according to its answer policy.
fn answer_breaks(mut session: SMBOwnerSession, answer: Option<SMBOplockLevel>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = session.next_break().await {
            if let Some(level) = answer {
                notification.acknowledge(level);
            }
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_entries_stay_compatible(answers in prop::array::uniform3(break_answer()), steps in prop::collection::vec(step(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let arbiter = SMBOpenArbiterBuilder::new(SMBMemoryStorage::new())
                .oplock_break_timeout(Duration::from_millis(20))
                .build()
                .unwrap();
            let mut sessions = Vec::new();
            let mut servicers = Vec::new();
            for answer in answers {
                let session = arbiter.register_owner();
                sessions.push(session.process_id());
                servicers.push(answer_breaks(session, answer));
            }
            arbiter.backend().add_file(PATH, 0);
            let mut opens: Vec<SMBOpen<SMBMemoryStorage>> = Vec::new();

            for step in steps {
                match step {
                    Step::Open { owner, mode, deny, oplock } => {
                        let request = SMBOpenRequest::new(sessions[owner], PATH, mode, deny, SMBCreateDisposition::Open)
                            .with_oplock(oplock);
                        if let Ok(outcome) = arbiter.open_file_shared(&request).await {
                            opens.push(outcome.into_open());
                        }
                    }
                    Step::Close(index) => {
                        if !opens.is_empty() {
                            let mut open = opens.remove(index % opens.len());
                            arbiter.close(&mut open).await.unwrap();
                        }
                    }
                }

                let entries = arbiter.share_modes(PATH).await.unwrap();
                assert_eq!(entries.len(), opens.len());
                assert_eq!(arbiter.open_files(), opens.len());
                assert_eq!(arbiter.backend().open_descriptors(), opens.len());
                let exclusive = entries.iter().filter(|entry| entry.oplock().is_exclusive()).count();
                assert!(exclusive <= 1, "{} exclusive leases in {:?}", exclusive, entries);
                if exclusive == 1 {
                    assert_eq!(entries.len(), 1, "exclusive lease shared: {:?}", entries);
                }
                assert_compatible(&entries);
            }
            for servicer in servicers {
                servicer.abort();
            }
        });
    }

    #[test]
    fn deny_all_is_never_shared(new_deny in deny_mode(), old_mode in open_mode(), same_process: bool, executable: bool) {
        prop_assert_eq!(access_table(new_deny, SMBDenyMode::DenyAll, old_mode, same_process, executable), SMBAccessGrant::Fail);
        prop_assert_eq!(access_table(SMBDenyMode::DenyAll, new_deny, old_mode, same_process, executable), SMBAccessGrant::Fail);
    }
}
