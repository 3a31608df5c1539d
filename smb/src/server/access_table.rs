use smb_core::error::SMBError;
use smb_core::logging::debug;
use smb_core::SMBResult;

use crate::server::client::SMBProcessId;
use crate::server::share::SMBAccessMode;
use crate::server::share_mode::{SMBDenyMode, SMBOpenMode, SMBShareModeEntry};

/// What an existing open allows a new opener to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SMBAccessGrant {
    Fail,
    GrantReadOnly,
    GrantWriteOnly,
    GrantAll,
}

const EXECUTABLE_EXTENSIONS: [&str; 4] = ["com", "dll", "exe", "sym"];

pub fn is_executable(path: &str) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, extension)) => EXECUTABLE_EXTENSIONS.iter().any(|known| extension.eq_ignore_ascii_case(known)),
        None => false,
    }
}

/// The DOS/Windows sharing truth table. Branch order is significant and reproduced as clients expect
/// it, including the same-process branch for read-only DenyDos opens that a DenyFcb request can
/// never reach.
pub fn access_table(new_deny: SMBDenyMode, old_deny: SMBDenyMode, old_mode: SMBOpenMode, same_process: bool, is_executable: bool) -> SMBAccessGrant {
    use SMBAccessGrant::*;
    use SMBDenyMode::*;

    if new_deny == DenyAll || old_deny == DenyAll {
        return Fail;
    }

    if same_process {
        if is_executable && old_mode == SMBOpenMode::ReadOnly && old_deny == DenyDos && new_deny == DenyRead {
            return Fail;
        }
        if !is_executable && old_mode == SMBOpenMode::ReadOnly && old_deny == DenyDos && new_deny == DenyDos {
            return GrantReadOnly;
        }
        if new_deny == DenyFcb && old_deny == DenyDos {
            if is_executable {
                return Fail;
            }
            if old_mode == SMBOpenMode::ReadOnly {
                return Fail;
            }
            return GrantAll;
        }
        if old_mode == SMBOpenMode::ReadOnly && old_deny == DenyDos && (new_deny == DenyFcb || new_deny == DenyRead) {
            if is_executable {
                return GrantReadOnly;
            }
            return Fail;
        }
        if old_deny == DenyFcb {
            if new_deny == DenyDos || new_deny == DenyFcb {
                return GrantAll;
            }
            return Fail;
        }
    }

    if old_deny.is_compatibility() || new_deny.is_compatibility() {
        if is_executable {
            if old_deny == DenyFcb || new_deny == DenyFcb {
                return Fail;
            }
            if old_deny == DenyDos {
                if new_deny == DenyRead && (old_mode == SMBOpenMode::ReadOnly || old_mode == SMBOpenMode::ReadWrite) {
                    return Fail;
                }
                if new_deny == DenyWrite && (old_mode == SMBOpenMode::WriteOnly || old_mode == SMBOpenMode::ReadWrite) {
                    return Fail;
                }
                return GrantAll;
            }
            if old_deny == DenyNone {
                return GrantAll;
            }
            if old_deny == DenyRead {
                return GrantWriteOnly;
            }
            if old_deny == DenyWrite {
                return GrantReadOnly;
            }
        }
        if old_deny == new_deny && same_process {
            return GrantAll;
        }
        if old_deny == DenyRead || new_deny == DenyRead {
            return Fail;
        }
        if old_mode == SMBOpenMode::ReadOnly {
            return GrantReadOnly;
        }
        return Fail;
    }

    match new_deny {
        DenyWrite => match (old_deny, old_mode) {
            (DenyWrite, SMBOpenMode::ReadOnly) => GrantReadOnly,
            (DenyRead, SMBOpenMode::ReadOnly) => GrantWriteOnly,
            (DenyNone, SMBOpenMode::ReadOnly) => GrantAll,
            _ => Fail,
        },
        DenyRead => match (old_deny, old_mode) {
            (DenyWrite, SMBOpenMode::WriteOnly) => GrantReadOnly,
            (DenyRead, SMBOpenMode::WriteOnly) => GrantWriteOnly,
            (DenyNone, SMBOpenMode::WriteOnly) => GrantAll,
            _ => Fail,
        },
        DenyNone => match old_deny {
            DenyWrite => GrantReadOnly,
            DenyRead => GrantWriteOnly,
            DenyNone => GrantAll,
            _ => Fail,
        },
        _ => Fail,
    }
}

/// The share-relevant half of an open request, checked against each existing entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SMBShareRequest<'a> {
    pub(crate) owner: SMBProcessId,
    pub(crate) path: &'a str,
    pub(crate) deny_mode: SMBDenyMode,
    pub(crate) fcb: bool,
    pub(crate) allow_share_delete: bool,
    pub(crate) delete_access_requested: bool,
}

/// Checks one existing entry against a new request, narrowing `access` when the table allows the
/// open only with less access than asked.
pub(crate) fn check_share_mode(entry: &SMBShareModeEntry, request: &SMBShareRequest<'_>, access: &mut SMBAccessMode) -> SMBResult<()> {
    if entry.delete_on_close() {
        debug!("{} has delete on close pending, refusing open by {}", request.path, request.owner);
        return Err(SMBError::access_denied(format!("{} is pending deletion", request.path)));
    }

    if request.delete_access_requested && !entry.allow_share_delete() {
        debug!("delete access on {} refused, open {} does not share delete", request.path, entry.entry_ref());
        return Err(SMBError::sharing_violation(format!("{} does not allow shared delete", request.path)));
    }

    if entry.delete_access_requested() && !request.allow_share_delete {
        debug!("open of {} must share delete with {}", request.path, entry.entry_ref());
        return Err(SMBError::sharing_violation(format!("{} is open for delete", request.path)));
    }

    let grant = access_table(request.deny_mode, entry.deny_mode(), entry.open_mode(), entry.owner() == request.owner, is_executable(request.path));
    let narrowed = match (grant, *access) {
        (SMBAccessGrant::GrantAll, requested) => Some(requested),
        (SMBAccessGrant::GrantReadOnly, SMBAccessMode::ReadOnly) => Some(SMBAccessMode::ReadOnly),
        (SMBAccessGrant::GrantReadOnly, SMBAccessMode::ReadWrite) if request.fcb => Some(SMBAccessMode::ReadOnly),
        (SMBAccessGrant::GrantWriteOnly, SMBAccessMode::WriteOnly) => Some(SMBAccessMode::WriteOnly),
        _ => None,
    };

    match narrowed {
        Some(mode) => {
            *access = mode;
            Ok(())
        }
        None => {
            debug!("sharing violation on {}: deny {:?} access {:?} against entry {} deny {:?} mode {:?} ({:?})",
                request.path, request.deny_mode, access, entry.entry_ref(), entry.deny_mode(), entry.open_mode(), grant);
            Err(SMBError::sharing_violation(format!("{} is open with an incompatible share mode", request.path)))
        }
    }
}

#[cfg(test)]
mod tests {
    use smb_core::nt_status::NTStatus;

    use super::*;

    use SMBAccessGrant::*;
    use SMBDenyMode::*;
    use SMBOpenMode::*;

    const ALL_DENY: [SMBDenyMode; 6] = [DenyDos, DenyAll, DenyWrite, DenyRead, DenyNone, DenyFcb];
    const ALL_MODES: [SMBOpenMode; 4] = [ReadOnly, WriteOnly, ReadWrite, Fcb];

    #[test]
    fn deny_all_always_fails() {
        for other in ALL_DENY {
            for mode in ALL_MODES {
                for same in [true, false] {
                    for exe in [true, false] {
                        assert_eq!(access_table(DenyAll, other, mode, same, exe), Fail);
                        assert_eq!(access_table(other, DenyAll, mode, same, exe), Fail);
                    }
                }
            }
        }
    }

    #[test]
    fn classic_deny_modes() {
        assert_eq!(access_table(DenyNone, DenyWrite, ReadWrite, false, false), GrantReadOnly);
        assert_eq!(access_table(DenyNone, DenyRead, ReadWrite, false, false), GrantWriteOnly);
        assert_eq!(access_table(DenyNone, DenyNone, ReadWrite, false, false), GrantAll);
        assert_eq!(access_table(DenyWrite, DenyWrite, ReadOnly, false, false), GrantReadOnly);
        assert_eq!(access_table(DenyWrite, DenyWrite, ReadWrite, false, false), Fail);
        assert_eq!(access_table(DenyWrite, DenyRead, ReadOnly, false, false), GrantWriteOnly);
        assert_eq!(access_table(DenyWrite, DenyNone, ReadOnly, false, false), GrantAll);
        assert_eq!(access_table(DenyWrite, DenyNone, WriteOnly, false, false), Fail);
        assert_eq!(access_table(DenyRead, DenyWrite, WriteOnly, false, false), GrantReadOnly);
        assert_eq!(access_table(DenyRead, DenyRead, WriteOnly, false, false), GrantWriteOnly);
        assert_eq!(access_table(DenyRead, DenyNone, WriteOnly, false, false), GrantAll);
        assert_eq!(access_table(DenyRead, DenyNone, ReadOnly, false, false), Fail);
    }

    #[test]
    fn same_process_dos_reopen_is_read_only() {
        assert_eq!(access_table(DenyDos, DenyDos, ReadOnly, true, false), GrantReadOnly);
        assert_eq!(access_table(DenyRead, DenyDos, ReadOnly, true, true), Fail);
    }

    #[test]
    fn same_process_fcb_over_dos() {
        assert_eq!(access_table(DenyFcb, DenyDos, ReadWrite, true, false), GrantAll);
        assert_eq!(access_table(DenyFcb, DenyDos, ReadWrite, true, true), Fail);
        assert_eq!(access_table(DenyFcb, DenyDos, ReadOnly, true, false), Fail);
    }

    #[test]
    fn read_only_dos_entry_shadows_the_fcb_branch() {
        // The later same-process branch would grant an executable read-only access, but the
        // FCB-over-DOS branch above it always answers first.
        assert_eq!(access_table(DenyFcb, DenyDos, ReadOnly, true, true), Fail);
        assert_eq!(access_table(DenyFcb, DenyDos, ReadOnly, true, false), Fail);
        assert_eq!(access_table(DenyRead, DenyDos, ReadOnly, true, false), Fail);
    }

    #[test]
    fn same_process_fcb_entries() {
        assert_eq!(access_table(DenyDos, DenyFcb, ReadWrite, true, false), GrantAll);
        assert_eq!(access_table(DenyFcb, DenyFcb, ReadWrite, true, false), GrantAll);
        assert_eq!(access_table(DenyNone, DenyFcb, ReadWrite, true, false), Fail);
    }

    #[test]
    fn executable_compatibility_branch() {
        assert_eq!(access_table(DenyDos, DenyFcb, ReadOnly, false, true), Fail);
        assert_eq!(access_table(DenyRead, DenyDos, ReadWrite, false, true), Fail);
        assert_eq!(access_table(DenyWrite, DenyDos, WriteOnly, false, true), Fail);
        assert_eq!(access_table(DenyWrite, DenyDos, ReadOnly, false, true), GrantAll);
        assert_eq!(access_table(DenyDos, DenyNone, ReadWrite, false, true), GrantAll);
        assert_eq!(access_table(DenyDos, DenyRead, ReadWrite, false, true), GrantWriteOnly);
        assert_eq!(access_table(DenyDos, DenyWrite, ReadWrite, false, true), GrantReadOnly);
    }

    #[test]
    fn non_executable_compatibility_branch() {
        assert_eq!(access_table(DenyDos, DenyDos, ReadWrite, false, false), Fail);
        assert_eq!(access_table(DenyDos, DenyDos, ReadOnly, false, false), GrantReadOnly);
        assert_eq!(access_table(DenyDos, DenyRead, ReadOnly, false, false), Fail);
        assert_eq!(access_table(DenyNone, DenyDos, ReadOnly, false, false), GrantReadOnly);
        assert_eq!(access_table(DenyNone, DenyDos, WriteOnly, false, false), Fail);
        assert_eq!(access_table(DenyDos, DenyDos, ReadWrite, true, false), GrantAll);
    }

    #[test]
    fn executable_extensions() {
        assert!(is_executable("setup.EXE"));
        assert!(is_executable("dir\\lib.dll"));
        assert!(is_executable("/a/b/c.Com"));
        assert!(is_executable("x.sym"));
        assert!(!is_executable("notes.txt"));
        assert!(!is_executable("exe"));
        assert!(!is_executable("dir.exe/file"));
    }

    fn request(owner: SMBProcessId, deny_mode: SMBDenyMode) -> SMBShareRequest<'static> {
        SMBShareRequest {
            owner,
            path: "foo",
            deny_mode,
            fcb: false,
            allow_share_delete: false,
            delete_access_requested: false,
        }
    }

    #[test]
    fn check_narrows_only_fcb_read_write() {
        let holder = SMBProcessId::new();
        let entry = SMBShareModeEntry::new(holder, 1, ReadWrite, DenyWrite);
        let mut access = SMBAccessMode::ReadWrite;
        let err = check_share_mode(&entry, &request(SMBProcessId::new(), DenyNone), &mut access).unwrap_err();
        assert_eq!(err.status(), NTStatus::SharingViolation);

        let mut fcb = request(SMBProcessId::new(), DenyNone);
        fcb.fcb = true;
        check_share_mode(&entry, &fcb, &mut access).unwrap();
        assert_eq!(access, SMBAccessMode::ReadOnly);
    }

    #[test]
    fn check_write_only_grant() {
        let entry = SMBShareModeEntry::new(SMBProcessId::new(), 1, ReadWrite, DenyRead);
        let mut access = SMBAccessMode::WriteOnly;
        check_share_mode(&entry, &request(SMBProcessId::new(), DenyNone), &mut access).unwrap();
        assert_eq!(access, SMBAccessMode::WriteOnly);
        let mut access = SMBAccessMode::ReadOnly;
        assert!(check_share_mode(&entry, &request(SMBProcessId::new(), DenyNone), &mut access).is_err());
    }

    #[test]
    fn delete_on_close_refuses_everyone() {
        let mut entry = SMBShareModeEntry::new(SMBProcessId::new(), 1, ReadOnly, DenyNone);
        entry.delete_on_close = true;
        let mut access = SMBAccessMode::ReadOnly;
        let err = check_share_mode(&entry, &request(SMBProcessId::new(), DenyNone), &mut access).unwrap_err();
        assert_eq!(err.status(), NTStatus::AccessDenied);
    }

    #[test]
    fn delete_access_needs_share_delete_both_ways() {
        let plain = SMBShareModeEntry::new(SMBProcessId::new(), 1, ReadOnly, DenyNone);
        let mut deleter = request(SMBProcessId::new(), DenyNone);
        deleter.delete_access_requested = true;
        let mut access = SMBAccessMode::ReadOnly;
        assert!(check_share_mode(&plain, &deleter, &mut access).unwrap_err().is_sharing_violation());

        let sharing = plain.clone().with_delete_sharing(true, false);
        check_share_mode(&sharing, &deleter, &mut access).unwrap();

        let deleting = SMBShareModeEntry::new(SMBProcessId::new(), 2, ReadOnly, DenyNone).with_delete_sharing(true, true);
        assert!(check_share_mode(&deleting, &request(SMBProcessId::new(), DenyNone), &mut access).is_err());
        let mut tolerant = request(SMBProcessId::new(), DenyNone);
        tolerant.allow_share_delete = true;
        check_share_mode(&deleting, &tolerant, &mut access).unwrap();
    }
}
