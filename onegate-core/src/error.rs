use std::fmt;

/// Broad classification of a framework error.
///
/// The kind drives the HTTP status classifier in the dispatcher; the numeric
/// [`code`](Error::code) is the stable machine-readable identity carried in
/// the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Server,
    Domain,
}

/// Stable numeric error codes.
///
/// 14xx codes mirror their HTTP cousins; five-digit codes refine a family.
/// Application-defined codes start at 2000.
pub mod code {
    pub const VALIDATION_FAILED: i32 = 1400;
    pub const UNSUPPORTED_CONTENT_TYPE: i32 = 1410;

    pub const UNAUTHENTICATED: i32 = 1401;
    pub const TOKEN_INVALID: i32 = 14011;
    pub const TOKEN_EXPIRED: i32 = 14012;
    pub const PRINCIPAL_INVALID: i32 = 14013;
    pub const CREDENTIALS_INVALID: i32 = 14014;
    pub const SIGNATURE_INVALID: i32 = 14015;
    pub const SIGNATURE_EXPIRED: i32 = 14016;
    pub const NONCE_ALREADY_USED: i32 = 14017;
    pub const UNSUPPORTED_AUTHENTICATION_TYPE: i32 = 14018;

    pub const FORBIDDEN: i32 = 1403;

    pub const RECORD_NOT_FOUND: i32 = 1404;
    pub const IDENTIFIER_NOT_FOUND: i32 = 14041;

    pub const CONFLICT: i32 = 1409;
    pub const DUPLICATE_IDENTIFIER: i32 = 14091;
    pub const VERSION_CONFLICT: i32 = 14092;

    pub const RATE_LIMITED: i32 = 1429;

    pub const INTERNAL: i32 = 1500;
    pub const NOT_IMPLEMENTED: i32 = 1501;
    pub const MISSING_CONTEXT: i32 = 1502;
    pub const UNRESOLVED_PARAMETER: i32 = 1503;
    pub const TIMEOUT: i32 = 1504;
}

/// The framework error value: kind, stable code, message, optional cause.
///
/// Every fallible framework path returns this type. Application handlers may
/// construct domain errors via [`Error::domain`].
pub struct Error {
    kind: ErrorKind,
    code: i32,
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause. The cause is logged, never serialized.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // ── Validation ──────────────────────────────────────────────────────

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code::VALIDATION_FAILED, message)
    }

    pub fn unsupported_content_type(content_type: &str) -> Self {
        Self::new(
            ErrorKind::Validation,
            code::UNSUPPORTED_CONTENT_TYPE,
            format!("unsupported content type: {content_type}"),
        )
    }

    // ── Authentication ──────────────────────────────────────────────────

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, code::UNAUTHENTICATED, message)
    }

    pub fn token_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, code::TOKEN_INVALID, message)
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorKind::Authentication, code::TOKEN_EXPIRED, "token expired")
    }

    pub fn principal_invalid() -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::PRINCIPAL_INVALID,
            "principal is invalid",
        )
    }

    pub fn credentials_invalid() -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::CREDENTIALS_INVALID,
            "invalid credentials",
        )
    }

    pub fn signature_invalid() -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::SIGNATURE_INVALID,
            "invalid signature",
        )
    }

    pub fn signature_expired() -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::SIGNATURE_EXPIRED,
            "signature timestamp outside tolerance",
        )
    }

    pub fn nonce_already_used() -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::NONCE_ALREADY_USED,
            "nonce already used",
        )
    }

    pub fn unsupported_authentication(kind: &str) -> Self {
        Self::new(
            ErrorKind::Authentication,
            code::UNSUPPORTED_AUTHENTICATION_TYPE,
            format!("unsupported authentication type: {kind}"),
        )
    }

    // ── Authorization ───────────────────────────────────────────────────

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, code::FORBIDDEN, message)
    }

    // ── Not found ───────────────────────────────────────────────────────

    pub fn record_not_found(what: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            code::RECORD_NOT_FOUND,
            format!("{} not found", what.into()),
        )
    }

    pub fn identifier_not_found(identifier: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::NotFound,
            code::IDENTIFIER_NOT_FOUND,
            format!("no handler registered for {identifier}"),
        )
    }

    // ── Conflict ────────────────────────────────────────────────────────

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, code::CONFLICT, message)
    }

    pub fn duplicate_identifier(identifier: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Conflict,
            code::DUPLICATE_IDENTIFIER,
            format!("duplicate handler identifier {identifier}"),
        )
    }

    pub fn version_conflict() -> Self {
        Self::new(
            ErrorKind::Conflict,
            code::VERSION_CONFLICT,
            "record was modified concurrently",
        )
    }

    // ── Rate limit ──────────────────────────────────────────────────────

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimit, code::RATE_LIMITED, "too many requests")
    }

    // ── Server ──────────────────────────────────────────────────────────

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, code::INTERNAL, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, code::NOT_IMPLEMENTED, message)
    }

    pub fn missing_context(what: &str) -> Self {
        Self::new(
            ErrorKind::Server,
            code::MISSING_CONTEXT,
            format!("request context has no value of type {what}"),
        )
    }

    pub fn unresolved_parameter(what: &str) -> Self {
        Self::new(
            ErrorKind::Server,
            code::UNRESOLVED_PARAMETER,
            format!("cannot resolve handler parameter of type {what}"),
        )
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Server, code::TIMEOUT, "request timed out")
    }

    // ── Domain ──────────────────────────────────────────────────────────

    /// Application-defined error. Codes below 2000 are reserved for the
    /// framework.
    pub fn domain(code: i32, message: impl Into<String>) -> Self {
        debug_assert!(code >= 2000, "domain error codes start at 2000");
        Self::new(ErrorKind::Domain, code, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{}] {}", self.kind, self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::validation(format!("malformed payload: {err}"))
    }
}
