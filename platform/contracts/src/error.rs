use std::fmt;

/// Classification of every failure the services surface or route on.
///
/// The kind decides the HTTP status, the consumer ack/NAK decision, and
/// whether a message is safe to show to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Auth-related
    Unauthorized,
    UserSignedOut,
    InvalidCredentials,
    Forbidden,

    // Validation
    InvalidArgument,
    MissingField,
    ValidationFailed,

    // Not found
    UserNotFound,
    ResourceNotFound,

    // Conflict
    AlreadyExists,

    // Internal
    Internal,
    CacheFailure,
    DatabaseFailure,

    // External collaborator failed (provider, peer service)
    External,

    // Rate limit
    TooManyRequests,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::UserSignedOut => "USER_SIGNED_OUT",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::MissingField => "MISSING_FIELD",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::CacheFailure => "CACHE_FAILURE",
            ErrorKind::DatabaseFailure => "DATABASE_FAILURE",
            ErrorKind::External => "EXTERNAL",
            ErrorKind::TooManyRequests => "TOO_MANY_REQUESTS",
        }
    }

    /// Parse the wire form back into a kind (used by RPC clients reading the
    /// error envelope). Unknown strings collapse to `Internal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "UNAUTHORIZED" => ErrorKind::Unauthorized,
            "USER_SIGNED_OUT" => ErrorKind::UserSignedOut,
            "INVALID_CREDENTIALS" => ErrorKind::InvalidCredentials,
            "FORBIDDEN" => ErrorKind::Forbidden,
            "INVALID_ARGUMENT" => ErrorKind::InvalidArgument,
            "MISSING_FIELD" => ErrorKind::MissingField,
            "VALIDATION_FAILED" => ErrorKind::ValidationFailed,
            "USER_NOT_FOUND" => ErrorKind::UserNotFound,
            "RESOURCE_NOT_FOUND" => ErrorKind::ResourceNotFound,
            "ALREADY_EXISTS" => ErrorKind::AlreadyExists,
            "CACHE_FAILURE" => ErrorKind::CacheFailure,
            "DATABASE_FAILURE" => ErrorKind::DatabaseFailure,
            "EXTERNAL" => ErrorKind::External,
            "TOO_MANY_REQUESTS" => ErrorKind::TooManyRequests,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a consumer should ack a message failing with this kind
    /// instead of NAKing it for redelivery. Retrying a malformed or
    /// business-rejected message can never succeed.
    pub fn is_terminal_for_consumer(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArgument
                | ErrorKind::MissingField
                | ErrorKind::ValidationFailed
                | ErrorKind::Forbidden
                | ErrorKind::ResourceNotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error carried across every layer.
///
/// `message` is client-safe; `source` is for logs only and never leaves the
/// process.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an infrastructure error as INTERNAL, logging the original and
    /// surfacing only the context string.
    pub fn internal(
        context: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        tracing::error!(error = %source, "{context}");
        Self {
            kind: ErrorKind::Internal,
            message: context.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a failed call to an external collaborator as EXTERNAL.
    pub fn external(
        context: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        tracing::error!(error = %source, "{context}");
        Self {
            kind: ErrorKind::External,
            message: context.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                AppError::new(ErrorKind::ResourceNotFound, "resource not found")
            }
            other => AppError::internal("database failure", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_form() {
        for kind in [
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::InvalidArgument,
            ErrorKind::ResourceNotFound,
            ErrorKind::AlreadyExists,
            ErrorKind::Internal,
            ErrorKind::External,
            ErrorKind::TooManyRequests,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn unknown_wire_form_collapses_to_internal() {
        assert_eq!(ErrorKind::parse("SOMETHING_NEW"), ErrorKind::Internal);
    }

    #[test]
    fn consumer_terminality() {
        assert!(ErrorKind::InvalidArgument.is_terminal_for_consumer());
        assert!(ErrorKind::ResourceNotFound.is_terminal_for_consumer());
        assert!(!ErrorKind::Internal.is_terminal_for_consumer());
        assert!(!ErrorKind::External.is_terminal_for_consumer());
    }

    #[test]
    fn row_not_found_maps_to_resource_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind, ErrorKind::ResourceNotFound);
    }
}
