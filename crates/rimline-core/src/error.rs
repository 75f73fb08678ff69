//! Error taxonomy for remote fetches

/// How the harvester should react to a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, 5xx, timeout: retry with backoff
    Transient,
    /// Malformed input, other 4xx, parse failure: skip or stub the item
    Permanent,
    /// Credentials rejected: refresh once, then surface
    Auth,
    /// Host unreachable, missing configuration: abort this harvester
    Fatal,
}

/// Error from a single remote fetch.
#[derive(Debug)]
pub enum FetchError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Request exceeded its timeout
    Timeout(String),
    /// Could not connect to the host at all
    Connect(String),
    /// Response body could not be parsed
    Parse(String),
    /// Identifier is not usable for a request
    InvalidId(String),
    /// Remote answered with a protocol-level error (OAI error codes)
    Protocol(String),
    /// Authentication failed after refresh
    Auth(String),
    /// Configuration or other non-recoverable condition
    Fatal(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Timeout(m) => write!(f, "timeout: {m}"),
            Self::Connect(m) => write!(f, "connect: {m}"),
            Self::Parse(m) => write!(f, "parse: {m}"),
            Self::InvalidId(m) => write!(f, "invalid identifier: {m}"),
            Self::Protocol(m) => write!(f, "protocol: {m}"),
            Self::Auth(m) => write!(f, "auth: {m}"),
            Self::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create from a reqwest error without leaking the request URL.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let e = e.without_url();
        let message = e.to_string();
        if e.is_timeout() {
            Self::Timeout(message)
        } else if e.is_connect() {
            Self::Connect(message)
        } else if e.is_decode() {
            Self::Parse(message)
        } else {
            Self::Http {
                status: e.status().map(|s| s.as_u16()),
                message,
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http { status, .. } => match status {
                Some(429 | 500 | 503) => ErrorClass::Transient,
                Some(401) => ErrorClass::Auth,
                Some(_) => ErrorClass::Permanent,
                // Body read interrupted mid-stream
                None => ErrorClass::Transient,
            },
            Self::Timeout(_) => ErrorClass::Transient,
            Self::Connect(_) | Self::Fatal(_) => ErrorClass::Fatal,
            Self::Parse(_) | Self::InvalidId(_) | Self::Protocol(_) => ErrorClass::Permanent,
            Self::Auth(_) => ErrorClass::Auth,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_transient() {
        for status in [429, 500, 503] {
            assert_eq!(FetchError::http(status, "x").class(), ErrorClass::Transient);
        }
    }

    #[test]
    fn other_4xx_permanent() {
        for status in [400, 403, 404, 410] {
            assert_eq!(FetchError::http(status, "x").class(), ErrorClass::Permanent);
        }
    }

    #[test]
    fn unauthorized_is_auth() {
        assert_eq!(FetchError::http(401, "x").class(), ErrorClass::Auth);
    }

    #[test]
    fn bad_gateway_not_in_transient_set() {
        assert_eq!(FetchError::http(502, "x").class(), ErrorClass::Permanent);
    }

    #[test]
    fn timeout_transient_connect_fatal() {
        assert!(FetchError::Timeout("t".into()).is_transient());
        assert_eq!(FetchError::Connect("c".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn parse_permanent() {
        let err: FetchError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", FetchError::http(404, "test")), "HTTP 404: test");
    }

    #[test]
    fn display_http_without_status() {
        let err = FetchError::Http {
            status: None,
            message: "reset".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: reset");
    }
}
