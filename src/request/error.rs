use thiserror::Error;

/// Why a request could not be dispatched.
///
/// A dispatch error never changes the request's state and never fires a
/// delegate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no URL set")]
    MissingUrl,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("no verb set")]
    EmptyVerb,

    #[error("host '{0}' is not in the allowed domain list")]
    DomainNotAllowed(String),

    #[error("an attempt is already in flight")]
    AlreadyInFlight,

    #[error("a previous attempt timed out; reset the timeout status first")]
    TimedOut,

    #[error("the HTTP manager no longer exists")]
    ManagerUnavailable,

    #[error("the HTTP manager is shutting down")]
    ShutDown,
}
