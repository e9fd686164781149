//! Local checks run before a create or update request is sent.
//!
//! Both functions return the normalized input that should go over the wire:
//! trimmed title and description, blank optionals dropped, defaults filled in
//! for creates.

use chrono::{DateTime, NaiveDate};

use crate::api::types::{CreateTaskInput, UpdateTaskInput};
use crate::error::ValidationErrors;

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

pub fn validate_create(input: &CreateTaskInput) -> Result<CreateTaskInput, ValidationErrors> {
  let mut errors = ValidationErrors::new();

  let title = check_title(&input.title, &mut errors);
  let description = check_description(input.description.as_deref(), &mut errors);
  let due_date = check_due_date(input.due_date.as_deref(), &mut errors);

  errors.into_result()?;

  Ok(CreateTaskInput {
    title: title.unwrap_or_default(),
    description,
    priority: Some(input.priority.unwrap_or_default()),
    status: Some(input.status.unwrap_or_default()),
    due_date,
  })
}

/// Same field rules as create, plus: at least one field must survive
/// normalization.
pub fn validate_update(input: &UpdateTaskInput) -> Result<UpdateTaskInput, ValidationErrors> {
  let mut errors = ValidationErrors::new();

  let title = match input.title.as_deref() {
    Some(title) => check_title(title, &mut errors),
    None => None,
  };
  let description = check_description(input.description.as_deref(), &mut errors);
  let due_date = check_due_date(input.due_date.as_deref(), &mut errors);

  let normalized = UpdateTaskInput {
    title,
    description,
    priority: input.priority,
    status: input.status,
    due_date,
  };

  if errors.is_empty() && normalized == UpdateTaskInput::default() {
    errors.add_general("At least one field must be updated");
  }
  errors.into_result()?;

  Ok(normalized)
}

fn check_title(raw: &str, errors: &mut ValidationErrors) -> Option<String> {
  let title = raw.trim();
  if title.is_empty() {
    errors.add("title", "Title is required");
    return None;
  }
  if title.chars().count() > TITLE_MAX_CHARS {
    errors.add("title", "Title must be less than 200 characters");
    return None;
  }
  Some(title.to_string())
}

/// Length is checked before trimming; blank becomes absent.
fn check_description(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
  let raw = raw?;
  if raw.chars().count() > DESCRIPTION_MAX_CHARS {
    errors.add("description", "Description must be less than 1000 characters");
    return None;
  }
  let trimmed = raw.trim();
  (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp; empty becomes absent.
fn check_due_date(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
  let raw = raw?.trim();
  if raw.is_empty() {
    return None;
  }
  let valid = NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
    || DateTime::parse_from_rfc3339(raw).is_ok();
  if !valid {
    errors.add("dueDate", "Due date must be a valid date");
    return None;
  }
  Some(raw.to_string())
}
