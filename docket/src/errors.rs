use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

use parking_lot::RwLock;

/// Error kinds for docket operations.
///
/// Each kind describes a specific category of failure and carries a stable
/// numeric code (see [`ErrorKind::code`]) so callers can distinguish
/// violation kinds programmatically instead of parsing messages.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Validation errors - client-caused, non-retryable as-is
    /// A value or command argument failed validation
    BadValue,
    /// A document field name is malformed (leading `$` or embedded `.`)
    InvalidFieldName,
    /// A pipeline definition is structurally invalid
    InvalidPipeline,
    /// `$sample` was given a missing, negative, or non-numeric size
    InvalidSampleSize,
    /// A regex pattern exceeds the configured length limit
    RegexTooLong,
    /// A hinted index does not exist
    UnknownHint,
    /// Error during filter construction or evaluation
    FilterError,

    // Constraint violations
    /// A unique index rejected a duplicate key
    DuplicateKey,
    /// Two array-valued fields cannot be part of one compound index entry
    ParallelArrays,
    /// A computed index key exceeds the configured size limit
    KeyTooLong,
    /// Operands of an expression have incompatible types
    TypeMismatch,

    // Index catalog errors
    /// Index creation conflicts with an existing index
    CannotCreateIndex,
    /// The key pattern conflicts with an existing index of the same name
    IndexKeySpecsConflict,
    /// Index options conflict with an existing index over the same keys
    IndexOptionsConflict,
    /// Index does not exist
    IndexNotFound,
    /// The hinted partial index cannot answer the query
    PlanningError,

    // Resource and consistency errors
    /// Cursor id is unknown, timed out, or was invalidated
    CursorNotFound,
    /// The operation deadline expired
    TimeLimitExceeded,
    /// Collection does not exist or was dropped mid-operation
    CollectionNotFound,
    /// A transactional write lost a conflict against a committed write
    WriteConflict,
    /// The transaction is no longer active
    TransactionAborted,

    // Operation errors
    /// The operation is not valid in the current context
    InvalidOperation,
    /// Error encoding or decoding data
    EncodingError,

    // Generic/internal - used as fallback, never expected in normal flow
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Stable numeric code for this error kind.
    ///
    /// Codes never change between releases; error messages may.
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::BadValue => 2,
            ErrorKind::TypeMismatch => 14,
            ErrorKind::CollectionNotFound => 26,
            ErrorKind::CursorNotFound => 43,
            ErrorKind::TimeLimitExceeded => 50,
            ErrorKind::InvalidFieldName => 52,
            ErrorKind::CannotCreateIndex => 67,
            ErrorKind::IndexOptionsConflict => 85,
            ErrorKind::IndexKeySpecsConflict => 86,
            ErrorKind::WriteConflict => 112,
            ErrorKind::ParallelArrays => 171,
            ErrorKind::IndexNotFound => 27,
            ErrorKind::UnknownHint => 6587,
            ErrorKind::PlanningError => 6588,
            ErrorKind::KeyTooLong => 17280,
            ErrorKind::RegexTooLong => 51091,
            ErrorKind::InvalidPipeline => 40323,
            ErrorKind::InvalidSampleSize => 28747,
            ErrorKind::FilterError => 6600,
            ErrorKind::DuplicateKey => 11000,
            ErrorKind::TransactionAborted => 251,
            ErrorKind::InvalidOperation => 6601,
            ErrorKind::EncodingError => 6602,
            ErrorKind::InternalError => 8000,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::BadValue => write!(f, "Bad value"),
            ErrorKind::InvalidFieldName => write!(f, "Invalid field name"),
            ErrorKind::InvalidPipeline => write!(f, "Invalid pipeline"),
            ErrorKind::InvalidSampleSize => write!(f, "Invalid sample size"),
            ErrorKind::RegexTooLong => write!(f, "Regex pattern too long"),
            ErrorKind::UnknownHint => write!(f, "Unknown hint"),
            ErrorKind::FilterError => write!(f, "Filter error"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::ParallelArrays => write!(f, "Cannot index parallel arrays"),
            ErrorKind::KeyTooLong => write!(f, "Index key too long"),
            ErrorKind::TypeMismatch => write!(f, "Type mismatch"),
            ErrorKind::CannotCreateIndex => write!(f, "Cannot create index"),
            ErrorKind::IndexKeySpecsConflict => write!(f, "Index key specs conflict"),
            ErrorKind::IndexOptionsConflict => write!(f, "Index options conflict"),
            ErrorKind::IndexNotFound => write!(f, "Index not found"),
            ErrorKind::PlanningError => write!(f, "Planning error"),
            ErrorKind::CursorNotFound => write!(f, "Cursor not found"),
            ErrorKind::TimeLimitExceeded => write!(f, "Time limit exceeded"),
            ErrorKind::CollectionNotFound => write!(f, "Collection not found"),
            ErrorKind::WriteConflict => write!(f, "Write conflict"),
            ErrorKind::TransactionAborted => write!(f, "Transaction aborted"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom docket error type.
///
/// `DocketError` encapsulates the error message, kind, and an optional cause.
/// It supports error chaining and backtraces for debugging.
///
/// The `DocketResult<T>` type alias is equivalent to `Result<T, DocketError>`
/// and is used throughout the codebase for operations that can fail.
#[derive(Clone)]
pub struct DocketError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<DocketError>>,
    backtrace: Arc<RwLock<Backtrace>>,
}

impl DocketError {
    /// Creates a new `DocketError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        DocketError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(RwLock::new(Backtrace::new())),
        }
    }

    /// Creates a new `DocketError` with a cause error.
    ///
    /// This creates an error chain where the cause error is preserved for
    /// debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: DocketError) -> Self {
        DocketError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(RwLock::new(Backtrace::new())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    /// Stable numeric code of this error's kind.
    pub fn code(&self) -> u32 {
        self.error_kind.code()
    }

    pub fn cause(&self) -> Option<&DocketError> {
        self.cause.as_deref()
    }
}

impl Display for DocketError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {}", cause)?;
        }
        Ok(())
    }
}

impl Debug for DocketError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "DocketError {{ kind: {:?} (code {}), message: {:?} }}",
            self.error_kind,
            self.error_kind.code(),
            self.message
        )?;
        if let Some(cause) = &self.cause {
            writeln!(f, "caused by: {:?}", cause)?;
        }
        let mut backtrace = self.backtrace.write();
        backtrace.resolve();
        write!(f, "{:?}", backtrace)
    }
}

impl Error for DocketError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

/// Result type used throughout docket.
pub type DocketResult<T> = Result<T, DocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_error() {
        let err = DocketError::new("index missing", ErrorKind::IndexNotFound);
        assert_eq!(err.message(), "index missing");
        assert_eq!(err.kind(), &ErrorKind::IndexNotFound);
        assert!(err.cause().is_none());
    }

    #[test]
    fn test_error_with_cause() {
        let cause = DocketError::new("key exists", ErrorKind::DuplicateKey);
        let err = DocketError::new_with_cause("insert failed", ErrorKind::InvalidOperation, cause);
        assert_eq!(err.cause().unwrap().kind(), &ErrorKind::DuplicateKey);
        let rendered = format!("{}", err);
        assert!(rendered.contains("caused by"));
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(ErrorKind::DuplicateKey.code(), 11000);
        assert_eq!(ErrorKind::ParallelArrays.code(), 171);
        assert_eq!(ErrorKind::TimeLimitExceeded.code(), 50);
        assert_eq!(ErrorKind::CursorNotFound.code(), 43);
    }

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            ErrorKind::BadValue,
            ErrorKind::InvalidFieldName,
            ErrorKind::InvalidPipeline,
            ErrorKind::InvalidSampleSize,
            ErrorKind::RegexTooLong,
            ErrorKind::UnknownHint,
            ErrorKind::FilterError,
            ErrorKind::DuplicateKey,
            ErrorKind::ParallelArrays,
            ErrorKind::KeyTooLong,
            ErrorKind::TypeMismatch,
            ErrorKind::CannotCreateIndex,
            ErrorKind::IndexKeySpecsConflict,
            ErrorKind::IndexOptionsConflict,
            ErrorKind::IndexNotFound,
            ErrorKind::PlanningError,
            ErrorKind::CursorNotFound,
            ErrorKind::TimeLimitExceeded,
            ErrorKind::CollectionNotFound,
            ErrorKind::WriteConflict,
            ErrorKind::TransactionAborted,
            ErrorKind::InvalidOperation,
            ErrorKind::EncodingError,
            ErrorKind::InternalError,
        ];
        let mut codes: Vec<u32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_display_kind() {
        assert_eq!(format!("{}", ErrorKind::ParallelArrays), "Cannot index parallel arrays");
    }
}
