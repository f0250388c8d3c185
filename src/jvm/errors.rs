use std::fmt;

/// Ways a single method transform can fail
///
/// Both variants abort the transform of the current method; no partial
/// output is ever handed back to the caller.
#[derive(Debug)]
pub enum Error {
    /// The caller asked for something structurally impossible: a constructor
    /// submitted for instrumentation, a released variable slot used, a type
    /// tag outside the accepted set, an argument count mismatch, or variable
    /// slots sharing an index within one fragment
    InvalidRequest(String),

    /// The incoming verifier data is inconsistent (eg. `void` appearing on
    /// the operand stack, or a continuation point with no computed frame)
    MalformedFrame(String),
}

impl Error {
    pub(crate) fn invalid_request(message: impl Into<String>) -> Error {
        Error::InvalidRequest(message.into())
    }

    pub(crate) fn malformed_frame(message: impl Into<String>) -> Error {
        Error::MalformedFrame(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRequest(message) => write!(f, "invalid request: {}", message),
            Error::MalformedFrame(message) => write!(f, "malformed frame: {}", message),
        }
    }
}

impl std::error::Error for Error {}
