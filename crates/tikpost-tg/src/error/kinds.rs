use std::time::Duration;
use thiserror::Error;

/// Input rejected up front. Repeating the same request will never help.
#[derive(Debug, Error)]
pub(crate) enum ValidationError {
    #[error(
        "Invalid proxy server `{server}`, expected `scheme://host:port` where \
        scheme is one of http, https, socks4, socks5"
    )]
    ProxyServer { server: String },

    #[error("Invalid proxy credentials in `{input}`")]
    ProxyCredentials { input: String },

    #[error(
        "Invalid slot `{input}`, expected `<day> <HH:MM> <type>`, e.g. `monday 12:00 short_fact`"
    )]
    SlotArgs { input: String },

    #[error("Invalid time `{input}`, expected the format HH:MM")]
    SlotTime { input: String },

    #[error("Unknown week day `{input}`, expected one of monday, tuesday, ..., sunday")]
    Weekday { input: String },

    #[error("Unknown content type `{input}`, expected one of short_fact, medium_fact, video")]
    ContentType { input: String },

    #[error("Invalid link `{input}`")]
    Link {
        input: String,
        source: url::ParseError,
    },

    #[error("Task kind `{kind}` is not registered")]
    TaskKind { kind: String },

    #[error("Unexpected facts file name `{name}`, expected short_facts.txt or medium_facts.txt")]
    FactsFileName { name: String },

    #[error("Facts file is empty")]
    EmptyFactsFile,

    #[error("Maximum number of parallel tasks must be positive")]
    MaxParallel,
}

#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("Task manager is stopped and doesn't accept new tasks")]
    Stopped,

    #[error("The {component} is shutting down")]
    ShuttingDown { component: &'static str },
}

/// An explicit deadline was exceeded
#[derive(Debug, Error)]
#[error("{operation} timed out after {timeout:.2?}")]
pub(crate) struct TimeoutError {
    pub(crate) operation: String,
    pub(crate) timeout: Duration,
}
