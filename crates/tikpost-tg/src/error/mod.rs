mod ext;
mod kinds;
mod macros;

use crate::prelude::*;
use crate::task::TaskId;
use crate::util::DynError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing_error::SpanTrace;

pub(crate) use ext::*;
pub(crate) use kinds::*;
pub(crate) use macros::*;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) mod prelude {
    pub(crate) use super::ext::{LogResultExt as _, OptionExt as _, ResultExt as _};
}

/// Describes any possible error that may happen in the application lifetime.
#[derive(Clone)]
pub struct Error {
    imp: Arc<ErrorImp>,
}

struct ErrorImp {
    /// Small identifier used for debugging purposes.
    /// It is mentioned in the chat when the error happens.
    /// This way we as developers can copy it and lookup the logs using this id.
    id: String,
    kind: ErrorKind,

    // Participates only in debug impl
    spantrace: SpanTrace,
}

#[derive(Error, Debug)]
pub(crate) enum ErrorKind {
    #[error(transparent)]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error(transparent)]
    Lifecycle {
        #[from]
        source: LifecycleError,
    },

    #[error(transparent)]
    Timeout {
        #[from]
        source: TimeoutError,
    },

    #[error("Task {task_id} failed after {attempts} attempt(s)")]
    TaskFailed {
        task_id: TaskId,
        attempts: u32,
        source: Error,
    },

    #[error(transparent)]
    Proxy {
        #[from]
        source: crate::proxy::ProxyError,
    },

    #[error(transparent)]
    Browser {
        #[from]
        source: crate::browser::BrowserError,
    },

    #[error(transparent)]
    Provider {
        #[from]
        source: crate::provider::ProviderError,
    },

    #[error(transparent)]
    Process {
        #[from]
        source: crate::util::process::ProcessError,
    },

    #[error(transparent)]
    Queue {
        #[from]
        source: crate::queue::QueueError,
    },

    #[error(transparent)]
    Db {
        #[from]
        source: crate::db::DbError,
    },

    #[error(transparent)]
    Tg {
        #[from]
        source: teloxide::RequestError,
    },

    #[error(transparent)]
    TgDownload {
        #[from]
        source: teloxide::DownloadError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Unrecoverable kind of error, that is not supposed to happen, but when
    /// it happens we can't do anything reasonable about it, so no structural
    /// error handling is possible, this error is just propagated to the top.
    #[error("FATAL: {message}")]
    Fatal {
        message: String,
        source: Option<Box<DynError>>,
    },
}

impl Error {
    pub(crate) fn id(&self) -> &str {
        &self.imp.id
    }

    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.imp.kind
    }

    /// Errors caused by interaction with the user.
    /// These are most likely caused by the admin sending wrong input.
    pub(crate) fn is_user_error(&self) -> bool {
        match self.kind() {
            ErrorKind::Validation { .. } | ErrorKind::Queue { .. } => true,
            ErrorKind::Proxy { source } => source.is_user_error(),
            ErrorKind::Lifecycle { .. }
            | ErrorKind::Timeout { .. }
            | ErrorKind::TaskFailed { .. }
            | ErrorKind::Browser { .. }
            | ErrorKind::Provider { .. }
            | ErrorKind::Process { .. }
            | ErrorKind::Db { .. }
            | ErrorKind::Tg { .. }
            | ErrorKind::TgDownload { .. }
            | ErrorKind::Io { .. }
            | ErrorKind::Fatal { .. } => false,
        }
    }

    /// Whether repeating the failed operation has any chance to succeed.
    ///
    /// Timeouts are deliberately not retryable. The caller's deadline has
    /// already passed, so there is nobody waiting for another attempt.
    pub(crate) fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Validation { .. }
            | ErrorKind::Lifecycle { .. }
            | ErrorKind::Timeout { .. }
            | ErrorKind::TaskFailed { .. }
            | ErrorKind::Queue { .. }
            | ErrorKind::Fatal { .. } => false,
            ErrorKind::Proxy { source } => !source.is_user_error(),
            ErrorKind::Provider { source } => source.is_retryable(),
            ErrorKind::Browser { .. }
            | ErrorKind::Process { .. }
            | ErrorKind::Db { .. }
            | ErrorKind::Tg { .. }
            | ErrorKind::TgDownload { .. }
            | ErrorKind::Io { .. } => true,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error (id: {}): {}", self.imp.id, self.imp.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.imp.kind.source()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        f.write_str("\n")?;
        fmt::Display::fmt(&self.imp.spantrace, f)
    }
}

impl<T: Into<ErrorKind>> From<T> for Error {
    #[track_caller]
    fn from(kind: T) -> Self {
        let imp = ErrorImp {
            kind: kind.into(),
            id: nanoid::nanoid!(6),
            spantrace: SpanTrace::capture(),
        };

        let err = Self { imp: Arc::new(imp) };

        trace!(err = tracing_err(&err), "Created an error");

        err
    }
}
