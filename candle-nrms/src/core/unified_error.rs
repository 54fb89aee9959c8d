//! Unified Error Handling System
//!
//! One error type for every layer of the recommender: configuration,
//! data loading, tensor plumbing, training and checkpoint persistence.
//! Helper constructors keep call sites short and make the error category
//! explicit, so callers can tell contract violations (raise loudly) apart
//! from recoverable conditions (log and continue).

use thiserror::Error;

/// Unified error type for all candle-nrms operations
#[derive(Debug, Error)]
pub enum UnifiedError {
    /// Configuration-related errors (file loading, parsing, validation)
    #[error("Configuration error in '{operation}': {source}{}", fmt_context(.context))]
    Configuration {
        operation: String,
        source: ConfigErrorType,
        context: Option<String>,
    },

    /// Model-related errors (construction, weight loading, inference)
    #[error("Model error ({component:?}) in '{operation}': {reason}{}", fmt_context(.context))]
    Model {
        component: ModelComponent,
        operation: String,
        reason: String,
        context: Option<String>,
    },

    /// Processing errors (tensor operations, batch assembly, computations)
    #[error("Processing error in '{operation}': {reason}{}", fmt_input(.input_context))]
    Processing {
        operation: String,
        reason: String,
        input_context: Option<String>,
    },

    /// Shape and contract violations at a component boundary
    #[error("Validation error for '{field}': expected '{expected}', got '{actual}'{}", fmt_context(.context))]
    Validation {
        field: String,
        expected: String,
        actual: String,
        context: Option<String>,
    },

    /// Source data problems that could not be recovered locally
    #[error("Data error in '{source_name}': {reason}")]
    Data { source_name: String, reason: String },

    /// Training instability (non-finite loss or gradients)
    #[error("Training error at step {step}: {reason}")]
    Training { step: usize, reason: String },

    /// Checkpoint persistence errors
    #[error("Checkpoint error in '{operation}' for '{checkpoint}': {reason}")]
    Checkpoint {
        operation: String,
        checkpoint: String,
        reason: String,
    },

    /// I/O errors (file operations, device access)
    #[error("I/O error in '{operation}': {source}{}", fmt_path(.path))]
    IO {
        operation: String,
        path: Option<String>,
        #[source]
        source: std::io::Error,
    },

    /// External library errors (candle, tokenizers, hf-hub)
    #[error("External error in {library} during '{operation}': {error}")]
    External {
        library: String,
        operation: String,
        error: String,
    },
}

fn fmt_context(context: &Option<String>) -> String {
    context
        .as_ref()
        .map(|ctx| format!(" (context: {})", ctx))
        .unwrap_or_default()
}

fn fmt_input(input: &Option<String>) -> String {
    input
        .as_ref()
        .map(|ctx| format!(" (input: {})", ctx))
        .unwrap_or_default()
}

fn fmt_path(path: &Option<String>) -> String {
    path.as_ref()
        .map(|p| format!(" (path: {})", p))
        .unwrap_or_default()
}

/// Configuration error subtypes
#[derive(Debug, Error)]
pub enum ConfigErrorType {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Model components an error can originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelComponent {
    ArticleEncoder,
    Scorer,
}

impl UnifiedError {
    /// Whether a serving-time error was caused by the caller's input
    ///
    /// Malformed request shapes are client errors and must be reported as
    /// such rather than coerced into a valid request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UnifiedError::Validation { .. } | UnifiedError::Data { .. }
        )
    }
}

/// Result type alias for unified error handling
pub type UnifiedResult<T> = Result<T, UnifiedError>;

/// Convert UnifiedError to candle_core::Error so it can cross candle closures
impl From<UnifiedError> for candle_core::Error {
    fn from(err: UnifiedError) -> Self {
        candle_core::Error::Msg(err.to_string())
    }
}

impl From<std::io::Error> for UnifiedError {
    fn from(err: std::io::Error) -> Self {
        UnifiedError::IO {
            operation: "I/O operation".to_string(),
            path: None,
            source: err,
        }
    }
}

impl From<serde_json::Error> for UnifiedError {
    fn from(err: serde_json::Error) -> Self {
        UnifiedError::Configuration {
            operation: "JSON parsing".to_string(),
            source: ConfigErrorType::ParseError(err.to_string()),
            context: None,
        }
    }
}

/// Create a validation error
#[macro_export]
macro_rules! validation_error {
    ($field:expr, $expected:expr, $actual:expr) => {
        $crate::core::UnifiedError::Validation {
            field: $field.to_string(),
            expected: $expected.to_string(),
            actual: $actual.to_string(),
            context: None,
        }
    };
    ($field:expr, $expected:expr, $actual:expr, $context:expr) => {
        $crate::core::UnifiedError::Validation {
            field: $field.to_string(),
            expected: $expected.to_string(),
            actual: $actual.to_string(),
            context: Some($context.to_string()),
        }
    };
}

/// Convert candle_core::Error to UnifiedError with context
pub fn from_candle_error(
    err: candle_core::Error,
    operation: &str,
    context: Option<&str>,
) -> UnifiedError {
    let error = match context {
        Some(ctx) => format!("{} ({})", err, ctx),
        None => err.to_string(),
    };
    UnifiedError::External {
        library: "candle-core".to_string(),
        operation: operation.to_string(),
        error,
    }
}

/// Convert a tokenizers error to UnifiedError
pub fn from_tokenizer_error<E: std::fmt::Display>(err: E, operation: &str) -> UnifiedError {
    UnifiedError::External {
        library: "tokenizers".to_string(),
        operation: operation.to_string(),
        error: err.to_string(),
    }
}

/// Wrap a failure inside a model component
pub fn to_model_error<E: std::fmt::Display>(
    err: E,
    component: ModelComponent,
    operation: &str,
) -> UnifiedError {
    UnifiedError::Model {
        component,
        operation: operation.to_string(),
        reason: err.to_string(),
        context: None,
    }
}

/// Configuration file loading errors
pub mod config_errors {
    use super::*;

    pub fn file_not_found(path: &str) -> UnifiedError {
        UnifiedError::Configuration {
            operation: "config file loading".to_string(),
            source: ConfigErrorType::FileNotFound(path.to_string()),
            context: None,
        }
    }

    pub fn missing_field(field: &str, file: &str) -> UnifiedError {
        UnifiedError::Configuration {
            operation: "config validation".to_string(),
            source: ConfigErrorType::MissingField(field.to_string()),
            context: Some(format!("in file: {}", file)),
        }
    }

    pub fn invalid_json(file: &str, error: &str) -> UnifiedError {
        UnifiedError::Configuration {
            operation: "JSON parsing".to_string(),
            source: ConfigErrorType::ParseError(error.to_string()),
            context: Some(format!("file: {}", file)),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> UnifiedError {
        UnifiedError::Configuration {
            operation: "config validation".to_string(),
            source: ConfigErrorType::InvalidData(format!("{}: {}", field, reason)),
            context: None,
        }
    }
}

/// Tensor shape contract errors raised at component boundaries
pub mod shape_errors {
    use super::*;

    pub fn mismatch(field: &str, expected: &[usize], actual: &[usize]) -> UnifiedError {
        UnifiedError::Validation {
            field: field.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
            context: None,
        }
    }

    pub fn rank(field: &str, expected_rank: usize, actual: &[usize]) -> UnifiedError {
        UnifiedError::Validation {
            field: field.to_string(),
            expected: format!("rank-{} tensor", expected_rank),
            actual: format!("{:?}", actual),
            context: None,
        }
    }

    pub fn dtype(field: &str, expected: candle_core::DType, actual: candle_core::DType) -> UnifiedError {
        UnifiedError::Validation {
            field: field.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
            context: Some("padding masks are U8 with 1 = padding".to_string()),
        }
    }
}

/// Processing operation errors
pub mod processing_errors {
    use super::*;

    pub fn empty_input(operation: &str) -> UnifiedError {
        UnifiedError::Processing {
            operation: operation.to_string(),
            reason: "empty input provided".to_string(),
            input_context: None,
        }
    }
}
