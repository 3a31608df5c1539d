use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use crate::nt_status::NTStatus;

#[derive(Debug)]
pub enum SMBError {
    ParseError(SMBParseError),
    PreconditionFailed(SMBPreconditionFailedError),
    IOError(SMBIOError),
    ResponseError(SMBResponseError),
    ServerError(SMBServerError),
}

impl SMBError {
    pub fn parse_error<T: Into<SMBParseError>>(error: T) -> Self {
        Self::ParseError(error.into())
    }

    pub fn precondition_failed<T: Into<SMBPreconditionFailedError>>(error: T) -> Self {
        Self::PreconditionFailed(error.into())
    }

    pub fn io_error<T: Into<SMBIOError>>(error: T) -> Self {
        Self::IOError(error.into())
    }

    pub fn response_error<T: Into<SMBResponseError>>(error: T) -> Self {
        Self::ResponseError(error.into())
    }

    pub fn server_error<T: Into<SMBServerError>>(error: T) -> Self {
        Self::ServerError(error.into())
    }

    pub fn sharing_violation<T: Into<String>>(message: T) -> Self {
        Self::response_error((NTStatus::SharingViolation, message))
    }

    pub fn lock_conflict<T: Into<String>>(message: T) -> Self {
        Self::response_error((NTStatus::FileLockConflict, message))
    }

    pub fn access_denied<T: Into<String>>(message: T) -> Self {
        Self::response_error((NTStatus::AccessDenied, message))
    }

    pub fn name_collision<T: Into<String>>(message: T) -> Self {
        Self::response_error((NTStatus::ObjectNameCollision, message))
    }

    pub fn resource_exhaustion<T: Into<String>>(message: T) -> Self {
        Self::response_error((NTStatus::TooManyOpenedFiles, message))
    }

    /// The status code the protocol layer should put on the wire for this error.
    pub fn status(&self) -> NTStatus {
        match self {
            Self::ParseError(_) => NTStatus::InvalidParameter,
            Self::PreconditionFailed(_) => NTStatus::InvalidParameter,
            Self::IOError(x) => x.status(),
            Self::ResponseError(x) => x.status,
            Self::ServerError(_) => NTStatus::UnknownError,
        }
    }

    pub fn is_sharing_violation(&self) -> bool {
        self.status() == NTStatus::SharingViolation
    }
}

#[derive(Debug)]
pub struct SMBParseError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBParseError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBPreconditionFailedError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBPreconditionFailedError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBPreconditionFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation failed with unmet precondition: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBIOError {
    error: io::Error,
}

impl SMBIOError {
    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }

    pub fn status(&self) -> NTStatus {
        match self.error.kind() {
            io::ErrorKind::NotFound => NTStatus::ObjectNameNotFound,
            io::ErrorKind::AlreadyExists => NTStatus::ObjectNameCollision,
            io::ErrorKind::PermissionDenied => NTStatus::AccessDenied,
            io::ErrorKind::IsADirectory => NTStatus::FileIsADirectory,
            io::ErrorKind::NotADirectory => NTStatus::NotADirectory,
            io::ErrorKind::ResourceBusy => NTStatus::SharingViolation,
            _ => NTStatus::UnknownError,
        }
    }
}

impl<T: Into<io::Error>> From<T> for SMBIOError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SMB I/O operation failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBResponseError {
    status: NTStatus,
    message: String,
}

impl From<NTStatus> for SMBResponseError {
    fn from(value: NTStatus) -> Self {
        Self {
            status: value,
            message: String::new(),
        }
    }
}

impl<T: Into<String>> From<(NTStatus, T)> for SMBResponseError {
    fn from(value: (NTStatus, T)) -> Self {
        Self {
            status: value.0,
            message: value.1.into(),
        }
    }
}

impl Display for SMBResponseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "Request failed with status {:?}", self.status)
        } else {
            write!(f, "Request failed with status {:?}: {}", self.status, self.message)
        }
    }
}

#[derive(Debug)]
pub struct SMBServerError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBServerError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Server failed with error: {}", self.error)
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(x) => write!(f, "{}", x),
            Self::PreconditionFailed(x) => write!(f, "{}", x),
            Self::IOError(x) => write!(f, "{}", x),
            Self::ResponseError(x) => write!(f, "{}", x),
            Self::ServerError(x) => write!(f, "{}", x)
        }
    }
}

impl std::error::Error for SMBError {}
