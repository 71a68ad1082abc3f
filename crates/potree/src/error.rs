//! Error types for the potree crate.

use std::fmt;

/// Result type for potree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming point cloud data.
///
/// Transport failures ([`Error::Http`], [`Error::HttpStatus`]) and decode
/// failures ([`Error::Decode`]) are terminal for the node they occur on;
/// the scheduler marks the node failed and keeps streaming the rest.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// Node, hierarchy or metadata bytes could not be decoded.
    Decode(potree_format::DecodeError),
    /// Invalid data or configuration.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// The point cloud path does not name a `cloud.js` file.
    UnsupportedSource {
        /// The rejected path.
        path: String,
    },
    /// A background channel closed before delivering its value.
    Disconnected {
        /// What was being waited for.
        context: &'static str,
    },
}

impl Error {
    /// True for failures fetching bytes from the server.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http { .. } | Error::HttpStatus { .. })
    }

    /// True for malformed or unexpected byte layouts.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::UnsupportedSource { path } => {
                write!(f, "unsupported point cloud source: {path}")
            }
            Error::Disconnected { context } => {
                write!(f, "{context} channel disconnected")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<potree_format::DecodeError> for Error {
    fn from(e: potree_format::DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use potree_format::DecodeError;

    #[test]
    fn test_classification() {
        let http = Error::HttpStatus {
            url: "http://a/r.bin".to_string(),
            status: 404,
        };
        assert!(http.is_transport());
        assert!(!http.is_decode());

        let decode = Error::from(DecodeError::MisalignedBuffer {
            len: 7,
            record_size: 5,
        });
        assert!(decode.is_decode());
        assert!(std::error::Error::source(&decode).is_some());
    }

    #[test]
    fn test_display() {
        let e = Error::HttpStatus {
            url: "http://a/r.bin".to_string(),
            status: 404,
        };
        assert_eq!(e.to_string(), "http request to http://a/r.bin returned status 404");
    }

    #[test]
    fn test_display_every_variant() {
        let errors = [
            Error::Http {
                url: "http://a/r.hrc".to_string(),
                message: "connection refused".to_string(),
            },
            Error::InvalidData {
                context: "hierarchy chunk",
                detail: "empty".to_string(),
            },
            Error::UnsupportedSource {
                path: "http://a/ept.json".to_string(),
            },
            Error::Disconnected { context: "worker" },
        ];
        for e in &errors {
            let classified = match e {
                Error::Http { .. } | Error::HttpStatus { .. } => e.is_transport(),
                Error::Decode(_) => e.is_decode(),
                Error::InvalidData { .. }
                | Error::UnsupportedSource { .. }
                | Error::Disconnected { .. } => !e.is_transport() && !e.is_decode(),
            };
            assert!(classified, "{e}");
            assert!(!e.to_string().is_empty());
        }
    }
}
