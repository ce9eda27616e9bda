use std::path::PathBuf;

/// Input validation failures.
///
/// Every variant names the offending field in brackets so the message can be
/// shown to the operator as-is. Validation runs before any sweep or plan is
/// started; a failure aborts the action without side effects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("[{field}] is required")]
    Required { field: &'static str },

    #[error("[{field}] must be a non-negative integer, got {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("[{field}] directory does not exist: {}", path.display())]
    DirectoryNotFound { field: &'static str, path: PathBuf },

    #[error("[{field}] {message}")]
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

impl ValidationError {
    /// Name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Required { field }
            | ValidationError::NotANumber { field, .. }
            | ValidationError::DirectoryNotFound { field, .. }
            | ValidationError::OutOfRange { field, .. } => field,
        }
    }

    pub(crate) fn out_of_range(field: &'static str, message: impl Into<String>) -> Self {
        ValidationError::OutOfRange {
            field,
            message: message.into(),
        }
    }
}
