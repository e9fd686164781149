use std::fmt;

use crate::api::types::TaskFilter;

/// Fingerprint of a cached request: operation plus its parameters.
///
/// `filter: None` (no filtering) and any `Some(filter)` are different
/// fingerprints, even when the filter happens to match nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
  /// `GET /tasks/get`
  Tasks { filter: Option<TaskFilter> },
  /// `GET /tasks/search`
  Search {
    term: String,
    filter: Option<TaskFilter>,
  },
}

impl QueryKey {
  pub fn tasks(filter: Option<TaskFilter>) -> Self {
    QueryKey::Tasks {
      filter: TaskFilter::normalize(filter),
    }
  }

  /// The entry optimistic mutations patch.
  pub fn unfiltered_tasks() -> Self {
    QueryKey::Tasks { filter: None }
  }

  pub fn search(term: &str, filter: Option<TaskFilter>) -> Self {
    QueryKey::Search {
      term: term.trim().to_string(),
      filter: TaskFilter::normalize(filter),
    }
  }

  /// Hierarchical form used for prefix matching, e.g.
  /// `["tasks", "list", "priority=high"]`.
  pub fn segments(&self) -> Vec<String> {
    match self {
      QueryKey::Tasks { filter } => {
        vec!["tasks".into(), "list".into(), filter_segment(filter.as_ref())]
      }
      QueryKey::Search { term, filter } => vec![
        "tasks".into(),
        "search".into(),
        term.clone(),
        filter_segment(filter.as_ref()),
      ],
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.segments().join(":"))
  }
}

fn filter_segment(filter: Option<&TaskFilter>) -> String {
  match filter {
    None => "all".to_string(),
    Some(filter) => format!(
      "priority={}&status={}",
      filter.priority.map(|p| p.as_str()).unwrap_or(""),
      filter.status.map(|s| s.as_str()).unwrap_or("")
    ),
  }
}

/// Selects every key whose segments start with the given ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPrefix(Vec<String>);

impl KeyPrefix {
  /// Every list and search entry.
  pub fn all_tasks() -> Self {
    KeyPrefix(vec!["tasks".into()])
  }

  pub fn task_lists() -> Self {
    KeyPrefix(vec!["tasks".into(), "list".into()])
  }

  pub fn searches() -> Self {
    KeyPrefix(vec!["tasks".into(), "search".into()])
  }

  /// Matches exactly one key.
  pub fn exact(key: &QueryKey) -> Self {
    KeyPrefix(key.segments())
  }

  pub fn matches(&self, key: &QueryKey) -> bool {
    let segments = key.segments();
    segments.len() >= self.0.len() && segments.iter().zip(&self.0).all(|(a, b)| a == b)
  }
}
