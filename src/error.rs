/*!
 * Error handling for plan execution and dataset loading
 *
 * Provides detailed error types with context, suggestions, and recovery guidance.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Library result type
pub type Result<T> = std::result::Result<T, PlanError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum PlanError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        context: ErrorContext,
    },

    /// JSON errors (plan documents, raw rows)
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Plan failed validation before any data access
    #[error("Invalid plan: {message}")]
    PlanValidation {
        message: String,
        missing_fields: Vec<String>,
    },

    /// Non-positive or non-integer limit
    #[error("Invalid plan limit '{limit}': limit must be a positive integer")]
    InvalidLimit {
        limit: String,
    },

    /// Invalid NPI with format guidance
    #[error("Invalid NPI '{npi}': {reason}")]
    InvalidNpi {
        npi: String,
        reason: String,
        suggestion: String,
    },

    /// Source file header does not carry the required columns
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        missing_columns: Vec<String>,
        file: Option<PathBuf>,
    },

    /// File not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Filter chain exceeded the configured time budget
    #[error("Plan execution exceeded {budget_ms} ms (aborted after {elapsed_ms} ms)")]
    Timeout {
        elapsed_ms: u128,
        budget_ms: u64,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub record_npi: Option<String>,
}

impl PlanError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let name = path.to_string_lossy().to_lowercase();
        let suggestion = if name.contains("provider") {
            format!(
                "Check if the provider file exists at '{}'. It must be a CSV with a 'type_1_npi' column.",
                path.display()
            )
        } else if name.contains("claim") {
            format!(
                "Check if the claims file exists at '{}'. It must be a CSV with a 'PRESCRIBER_NPI_NBR' column.",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Make sure the path is correct and you have read permissions.",
                path.display()
            )
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create an invalid NPI error with validation details
    pub fn invalid_npi(npi: &str) -> Self {
        let (reason, suggestion) = if npi.trim().is_empty() {
            ("NPI cannot be empty".to_string(),
             "Provide a numeric NPI".to_string())
        } else if npi.trim().trim_start_matches('0').is_empty() {
            ("NPI cannot be zero".to_string(),
             "Zero is a placeholder for an unknown prescriber".to_string())
        } else {
            ("NPI must contain only digits".to_string(),
             "Remove any non-numeric characters from the NPI".to_string())
        };

        Self::InvalidNpi {
            npi: npi.to_string(),
            reason,
            suggestion,
        }
    }

    /// Create a validation error listing every missing top-level field
    pub fn missing_plan_fields(missing_fields: Vec<String>) -> Self {
        Self::PlanValidation {
            message: format!("missing required field(s): {}", missing_fields.join(", ")),
            missing_fields,
        }
    }

    /// Create a validation error with a plain message
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::PlanValidation {
            message: message.into(),
            missing_fields: Vec::new(),
        }
    }

    /// Create a schema mismatch error for missing columns
    pub fn missing_columns(missing_columns: Vec<String>, file: Option<PathBuf>) -> Self {
        let message = match &file {
            Some(path) => format!(
                "'{}' is missing required column(s): {}",
                path.display(),
                missing_columns.join(", ")
            ),
            None => format!("missing required column(s): {}", missing_columns.join(", ")),
        };

        Self::SchemaMismatch {
            message,
            missing_columns,
            file,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::InvalidNpi { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::PlanValidation { missing_fields, .. } if !missing_fields.is_empty() => {
                format!(
                    "{}\n\nRequired top-level fields: query_type, filters, projection, limit",
                    self
                )
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Timeout { .. } => {
                format!("{}\n\nSuggestion: narrow the plan filters or raise filter_timeout_ms", self)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for PlanError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for PlanError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line() as usize);

        Self::CsvParse {
            message: err.to_string(),
            line,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_lists_all() {
        let err = PlanError::missing_plan_fields(vec!["filters".into(), "limit".into()]);
        assert_eq!(err.to_string(), "Invalid plan: missing required field(s): filters, limit");
        assert!(err.user_message().contains("Required top-level fields"));
    }

    #[test]
    fn test_invalid_npi_reason() {
        match PlanError::invalid_npi("000") {
            PlanError::InvalidNpi { reason, .. } => assert_eq!(reason, "NPI cannot be zero"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
