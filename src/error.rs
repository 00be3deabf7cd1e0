use thiserror::Error;

use crate::tensor::DType;

/// Main error type for tile execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TesseraError {
    /// Operand shape or tiling incompatibility, raised before any task is submitted
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// No codelet registered for the requested element type
    #[error("Type not supported: operation '{op}' has no codelet for {dtype}")]
    UnsupportedType { op: String, dtype: DType },

    /// Access to a handle after it was unregistered
    #[error("Used after release: {0}")]
    UseAfterRelease(String),

    /// Codelet registered twice for the same key
    #[error("Duplicate registration: operation '{op}' already has a codelet for {dtype}")]
    DuplicateRegistration { op: String, dtype: DType },

    /// A submitted task failed while running
    #[error("Task failure in '{task}': {message}")]
    TaskFailure { task: String, message: String },

    /// An inter-node copy failed
    #[error("Transfer failure: {0}")]
    TransferFailure(String),

    /// Linear or coordinate index outside of its valid range
    #[error("Index {index} out of range [0, {bound})")]
    IndexOutOfRange { index: usize, bound: usize },

    /// Operands disagree on element type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// No allowed device family can run the requested codelet
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    /// Internal errors that shouldn't happen
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TesseraError {
    /// Create a shape error with helpful suggestions
    pub fn shape_error(expected: &str, got: &str, suggestion: Option<&str>) -> Self {
        let message = if let Some(sugg) = suggestion {
            format!("Expected {}, got {}. Suggestion: {}", expected, got, sugg)
        } else {
            format!("Expected {}, got {}", expected, got)
        };
        TesseraError::ShapeMismatch(message)
    }

    pub fn task_failure(task: &str, message: impl Into<String>) -> Self {
        TesseraError::TaskFailure {
            task: task.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported_type(op: &str, dtype: DType) -> Self {
        TesseraError::UnsupportedType {
            op: op.to_string(),
            dtype,
        }
    }
}

impl From<std::io::Error> for TesseraError {
    fn from(err: std::io::Error) -> Self {
        TesseraError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for TesseraError {
    fn from(err: bincode::Error) -> Self {
        TesseraError::SerializationError(err.to_string())
    }
}

/// Result type for tessera operations
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub tensor_shapes: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            tensor_shapes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: &str) -> Self {
        self.tensor_shapes.push(shape.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operation: {}", self.operation);

        if !self.tensor_shapes.is_empty() {
            message.push_str(&format!("\nTensor shapes: {}", self.tensor_shapes.join(", ")));
        }

        if !self.suggestions.is_empty() {
            message.push_str("\nSuggestions:");
            for suggestion in &self.suggestions {
                message.push_str(&format!("\n  - {}", suggestion));
            }
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> TesseraResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for TesseraResult<T> {
    fn with_context<F>(self, f: F) -> TesseraResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                TesseraError::ShapeMismatch(msg) => {
                    TesseraError::ShapeMismatch(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                TesseraError::InvalidInput(msg) => {
                    TesseraError::InvalidInput(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ShapeMismatch,
    UnsupportedType,
    UseAfterRelease,
    DuplicateRegistration,
    TaskFailure,
    TransferFailure,
    OutOfRange,
    DeviceUnavailable,
    InvalidOperation,
    ConfigInvalid,
    InternalError,
}

impl TesseraError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            TesseraError::ShapeMismatch(_) => ErrorCode::ShapeMismatch,
            TesseraError::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            TesseraError::UseAfterRelease(_) => ErrorCode::UseAfterRelease,
            TesseraError::DuplicateRegistration { .. } => ErrorCode::DuplicateRegistration,
            TesseraError::TaskFailure { .. } => ErrorCode::TaskFailure,
            TesseraError::TransferFailure(_) => ErrorCode::TransferFailure,
            TesseraError::IndexOutOfRange { .. } => ErrorCode::OutOfRange,
            TesseraError::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
            TesseraError::TypeMismatch(_) => ErrorCode::InvalidOperation,
            TesseraError::InvalidInput(_) => ErrorCode::InvalidOperation,
            TesseraError::InvalidState(_) => ErrorCode::InvalidOperation,
            TesseraError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            TesseraError::SerializationError(_) => ErrorCode::InvalidOperation,
            TesseraError::IoError(_) => ErrorCode::InvalidOperation,
            TesseraError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    /// Synchronous errors leave no side effects behind; task and transfer
    /// failures abort the whole batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ShapeMismatch
                | ErrorCode::UnsupportedType
                | ErrorCode::DuplicateRegistration
                | ErrorCode::OutOfRange
                | ErrorCode::DeviceUnavailable
                | ErrorCode::InvalidOperation
                | ErrorCode::ConfigInvalid
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            TesseraError::ShapeMismatch(msg) => {
                format!("Shape Error: {}\n\nOperand tensors must agree on shape and basetile shape along every axis the operation maps between them.", msg)
            }
            TesseraError::UnsupportedType { op, dtype } => {
                format!("Unsupported Type: '{}' has no kernels for {}. Convert the tensor to f32 or f64 first.", op, dtype)
            }
            TesseraError::TaskFailure { task, message } => {
                format!("Task Failure in '{}': {}\n\nThe batch was aborted; tiles completed before the failure keep their new values.", task, message)
            }
            TesseraError::TransferFailure(msg) => {
                format!("Transfer Failure: {}\n\nAn inter-node copy did not complete. The batch was aborted.", msg)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error() {
        let error = TesseraError::shape_error("[2, 2]", "[2, 3]", Some("Retile one operand with copy_intersection"));
        assert!(error.to_string().contains("Expected [2, 2], got [2, 3]"));
        assert!(error.to_string().contains("copy_intersection"));
    }

    #[test]
    fn test_error_context() {
        let result: TesseraResult<()> = Err(TesseraError::ShapeMismatch("basetile differs".to_string()));
        let err = result
            .with_context(|| {
                ErrorContext::new("add")
                    .with_shape("[4, 4]/[2, 2]")
                    .with_shape("[4, 4]/[2, 3]")
                    .with_suggestion("Use identical basetile shapes")
            })
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Operation: add"));
        assert!(message.contains("Tensor shapes: [4, 4]/[2, 2], [4, 4]/[2, 3]"));
        assert!(message.contains("Use identical basetile shapes"));
    }

    #[test]
    fn test_error_codes() {
        let shape_error = TesseraError::ShapeMismatch("test".to_string());
        assert_eq!(shape_error.code(), ErrorCode::ShapeMismatch);
        assert!(shape_error.is_recoverable());

        let task_error = TesseraError::task_failure("add", "kernel reported NaN");
        assert_eq!(task_error.code(), ErrorCode::TaskFailure);
        assert!(!task_error.is_recoverable());

        let transfer_error = TesseraError::TransferFailure("closed".to_string());
        assert!(!transfer_error.is_recoverable());
    }

    #[test]
    fn test_user_message() {
        let error = TesseraError::unsupported_type("gelutanh", DType::F16);
        let message = error.user_message();
        assert!(message.contains("gelutanh"));
        assert!(message.contains("f16"));
    }
}
