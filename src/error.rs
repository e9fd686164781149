//! Error taxonomy shared by the transport, the query cache and the mutation
//! coordinator.

use std::fmt;

use thiserror::Error;

/// Message used when neither the response body nor the transport says anything.
pub const FALLBACK_MESSAGE: &str = "An error occurred";

/// Errors surfaced by API calls.
///
/// `Validation` is produced locally before any request is sent. The other
/// variants come from the transport, classified by response status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  #[error("{0}")]
  Validation(ValidationErrors),

  /// 401 from any endpoint. The login redirect has already fired.
  #[error("{message}")]
  Auth { message: String },

  /// Any other 4xx, or an envelope that reported failure.
  #[error("{message}")]
  Request { status: Option<u16>, message: String },

  /// No response received, or a 5xx.
  #[error("{message}")]
  Transient { status: Option<u16>, message: String },
}

impl ApiError {
  pub fn request(status: Option<u16>, message: impl Into<String>) -> Self {
    ApiError::Request {
      status,
      message: message.into(),
    }
  }

  pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
    ApiError::Transient {
      status,
      message: message.into(),
    }
  }

  /// Classify a failed response by its HTTP status.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      401 => ApiError::Auth { message },
      500..=599 => ApiError::Transient {
        status: Some(status),
        message,
      },
      _ => ApiError::Request {
        status: Some(status),
        message,
      },
    }
  }

  /// Only network failures and server errors are worth another attempt.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ApiError::Transient { .. })
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, ApiError::Validation(_))
  }

  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::Auth { .. })
  }

  /// No response came back at all.
  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Transient { status: None, .. })
  }

  /// What the user can do about a transient failure.
  pub fn hint(&self) -> Option<&'static str> {
    match self {
      ApiError::Transient { status: None, .. } => {
        Some("Network error. Please check your connection and try again.")
      }
      ApiError::Transient { status: Some(_), .. } => Some("Server error. Please try again later."),
      _ => None,
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Validation(_) => None,
      ApiError::Auth { .. } => Some(401),
      ApiError::Request { status, .. } | ApiError::Transient { status, .. } => *status,
    }
  }
}

impl From<ValidationErrors> for ApiError {
  fn from(errors: ValidationErrors) -> Self {
    ApiError::Validation(errors)
  }
}

/// A single field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
  /// Wire name of the offending field, or `None` for whole-input rules.
  pub field: Option<&'static str>,
  pub message: String,
}

/// All validation failures for one input, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
  errors: Vec<FieldError>,
}

impl ValidationErrors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
    self.errors.push(FieldError {
      field: Some(field),
      message: message.into(),
    });
  }

  pub fn add_general(&mut self, message: impl Into<String>) {
    self.errors.push(FieldError {
      field: None,
      message: message.into(),
    });
  }

  pub fn is_empty(&self) -> bool {
    self.errors.is_empty()
  }

  pub fn errors(&self) -> &[FieldError] {
    &self.errors
  }

  /// First message recorded for `field`.
  pub fn field(&self, field: &str) -> Option<&str> {
    self
      .errors
      .iter()
      .find(|e| e.field == Some(field))
      .map(|e| e.message.as_str())
  }

  /// `Ok(())` when nothing was recorded.
  pub fn into_result(self) -> Result<(), ValidationErrors> {
    if self.is_empty() {
      Ok(())
    } else {
      Err(self)
    }
  }
}

impl fmt::Display for ValidationErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for error in &self.errors {
      if !first {
        f.write_str("; ")?;
      }
      first = false;
      match error.field {
        Some(field) => write!(f, "{}: {}", field, error.message)?,
        None => f.write_str(&error.message)?,
      }
    }
    Ok(())
  }
}

impl std::error::Error for ValidationErrors {}

/// Errors from the local SQLite store.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Failed to open database at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("Could not determine data directory")]
  NoDataDir,

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Lock poisoned")]
  Poisoned,
}
