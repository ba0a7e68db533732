use thiserror::Error;

/// Input validation failures. Raised while loading the action file or while
/// resolving a target, always before the offending action mutates anything.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action file is not a JSON array of objects: {0}")]
    MalformedFile(String),

    #[error("unsupported action #{index}: {action}")]
    UnsupportedAction { index: usize, action: String },

    #[error("invalid `{action_type}` action #{index}: {reason}")]
    InvalidAction {
        index: usize,
        action_type: String,
        reason: String,
    },

    #[error("unsupported target {target} for {family}")]
    UnsupportedTarget { target: String, family: String },

    #[error("target `{target}` requires field `{field}`")]
    MissingScopeKey { target: String, field: &'static str },

    #[error("folder path `{0}` has no segments")]
    EmptyFolderPath(String),
}

/// Remote failures. The raw server response is kept verbatim.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{operation} failed with HTTP {status}\nresponse body:\n{body}")]
    Transport {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} returned a SOAP fault\nresponse body:\n{body}")]
    SoapFault { operation: String, body: String },

    #[error("claims sign-in failed: {0}")]
    SignIn(String),
}
