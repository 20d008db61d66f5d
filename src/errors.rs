//! The single error channel for the crate.
//!
//! Every failure the tool can hit is one of these kinds; the CLI adapter
//! prints one line and exits non-zero. Local recovery is limited to the
//! retry harness in [`crate::upload::retry`], which only re-attempts
//! transport failures and 5xx responses.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Operator misuse: missing or conflicting flags, unusable payload.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// The bearer token cannot be read or its payload cannot be decoded.
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    /// A claim the current mode requires is absent from the token.
    #[error("required claim {0} missing from bearer token")]
    MissingClaim(&'static str),

    /// The `exp` claim is missing, non-numeric, or not in the future.
    #[error("exp claim missing or invalid")]
    ExpInvalid,

    /// The supplied public key PEM cannot be parsed or used.
    #[error("cannot use public key: {0}")]
    BadKey(String),

    /// An encryption or randomness operation failed.
    #[error("cryptographic operation failed: {0}")]
    CryptoFail(String),

    /// Local filesystem or stream failure.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The server response violates the upload protocol.
    #[error("upload protocol violation: {0}")]
    Protocol(String),

    /// The server rejected a request (4xx), or 5xx responses exhausted the
    /// retry budget.
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    /// Transport-level failure talking to the server after retries.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The operation was interrupted before it could finish.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Io(io::Error::new(io::ErrorKind::Other, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_one_line() {
        let errors: Vec<Error> = vec![
            Error::BadInput("x".into()),
            Error::InvalidToken("y".into()),
            Error::MissingClaim("x-public-key"),
            Error::ExpInvalid,
            Error::BadKey("bad pem".into()),
            Error::CryptoFail("rng".into()),
            Error::Protocol("missing fields".into()),
            Error::Server {
                status: 503,
                body: "unavailable".into(),
            },
            Error::Cancelled,
        ];
        for e in errors {
            assert!(!e.to_string().contains('\n'));
        }
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn server_error_carries_status_and_body() {
        let err = Error::Server {
            status: 401,
            body: "Unauthorized".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("Unauthorized"));
    }
}
