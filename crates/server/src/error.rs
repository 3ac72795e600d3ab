use waypoint_common::protocol::ws::ServerMessage;

/// Registry of caller-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidIdentity,
    AccessDenied,
    NotFound,
    ValidationFailed,
    StoreTimeout,
    StoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidIdentity => "INVALID_IDENTITY",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::StoreTimeout => "STORE_TIMEOUT",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::StoreTimeout | Self::StoreUnavailable | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidIdentity => "neither a user hash nor a participant hash was supplied",
            Self::AccessDenied => "caller lacks required permission",
            Self::NotFound => "requested resource not found",
            Self::ValidationFailed => "request validation failed",
            Self::StoreTimeout => "external store call timed out",
            Self::StoreUnavailable => "external store is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

/// Session-core error carried through resolver and gateway paths.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", code.as_str())]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Authorization paths fail closed: a store that cannot answer is
    /// treated as a denial, never as a grant.
    pub fn fail_closed(self) -> Self {
        match self.code {
            ErrorCode::StoreTimeout | ErrorCode::StoreUnavailable => {
                Self::new(ErrorCode::AccessDenied, ErrorCode::AccessDenied.default_message())
            }
            _ => self,
        }
    }

    /// Caller-only wire frame for this error.
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            retryable: self.code.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use waypoint_common::protocol::ws::ServerMessage;

    use super::{ErrorCode, SessionError};

    #[test]
    fn store_failures_fail_closed_on_authorization_paths() {
        let timeout = SessionError::from_code(ErrorCode::StoreTimeout).fail_closed();
        assert_eq!(timeout.code, ErrorCode::AccessDenied);

        let unavailable = SessionError::from_code(ErrorCode::StoreUnavailable).fail_closed();
        assert_eq!(unavailable.code, ErrorCode::AccessDenied);

        let not_found = SessionError::from_code(ErrorCode::NotFound).fail_closed();
        assert_eq!(not_found.code, ErrorCode::NotFound);
    }

    #[test]
    fn session_error_maps_to_wire_frame() {
        let frame = SessionError::new(ErrorCode::StoreUnavailable, "participant store is down")
            .to_server_message();
        match frame {
            ServerMessage::Error { code, message, retryable } => {
                assert_eq!(code, "STORE_UNAVAILABLE");
                assert_eq!(message, "participant store is down");
                assert!(retryable);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }
}
