use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debounce::SEARCH_DEBOUNCE;
use crate::query::{
  CacheOptions, RetryPolicy, DEFAULT_GC_TIME, DEFAULT_STALE_TIME, MUTATION_RETRIES, QUERY_RETRIES,
};
use crate::recent::RECENT_SEARCH_LIMIT;
use crate::search::{SearchOptions, MIN_SEARCH_LENGTH};

/// Overrides `api.base_url`; enough on its own to run without a file.
pub const API_URL_ENV: &str = "TASKDECK_API_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// e.g. `https://tasks.example.com/api.v1`
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Seconds a fetched list or search stays fresh
  pub stale_time_secs: u64,
  /// Seconds an unwatched entry survives after its last use
  pub gc_time_secs: u64,
  pub query_retries: u32,
  pub mutation_retries: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: DEFAULT_STALE_TIME.as_secs(),
      gc_time_secs: DEFAULT_GC_TIME.as_secs(),
      query_retries: QUERY_RETRIES,
      mutation_retries: MUTATION_RETRIES,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }

  pub fn gc_time(&self) -> Duration {
    Duration::from_secs(self.gc_time_secs)
  }

  pub fn options(&self) -> CacheOptions {
    CacheOptions {
      stale_time: self.stale_time(),
      gc_time: self.gc_time(),
      retry: self.query_retry(),
    }
  }

  pub fn query_retry(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.query_retries,
      ..RetryPolicy::queries()
    }
  }

  pub fn mutation_retry(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.mutation_retries,
      ..RetryPolicy::mutations()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub debounce_ms: u64,
  /// Shortest trimmed query that is sent to the server
  pub min_length: usize,
  pub recent_limit: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: SEARCH_DEBOUNCE.as_millis() as u64,
      min_length: MIN_SEARCH_LENGTH,
      recent_limit: RECENT_SEARCH_LIMIT,
    }
  }
}

impl SearchConfig {
  pub fn options(&self) -> SearchOptions {
    SearchOptions {
      debounce: Duration::from_millis(self.debounce_ms),
      min_length: self.min_length,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskdeck/config.yaml
  ///
  /// `TASKDECK_API_URL` wins over the file's `api.base_url`, and with no file
  /// at all it yields a config with defaults everywhere else.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let env_url = std::env::var(API_URL_ENV)
      .ok()
      .filter(|url| !url.trim().is_empty());
    Self::load_with(explicit_path, env_url)
  }

  fn load_with(explicit_path: Option<&Path>, env_url: Option<String>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match (path, env_url) {
      (Some(p), Some(url)) => Config {
        api: ApiConfig { base_url: url },
        ..Self::load_from_path(&p, true)?
      },
      (Some(p), None) => Self::load_from_path(&p, false)?,
      (None, Some(url)) => Config::with_base_url(url),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/taskdeck/config.yaml\n\
                 or set {} to the API base URL.",
          API_URL_ENV
        ))
      }
    };

    config.validate()?;
    Ok(config)
  }

  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Config {
      api: ApiConfig {
        base_url: base_url.into(),
      },
      cache: CacheConfig::default(),
      search: SearchConfig::default(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("taskdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  /// `api` may be missing from the file when the URL comes from the
  /// environment.
  fn load_from_path(path: &Path, api_optional: bool) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let parse_error = |e: serde_yaml::Error| eyre!("Failed to parse config file {}: {}", path.display(), e);

    if api_optional {
      let partial: PartialConfig = serde_yaml::from_str(&contents).map_err(parse_error)?;
      return Ok(Config {
        api: ApiConfig {
          base_url: String::new(),
        },
        cache: partial.cache,
        search: partial.search,
      });
    }

    serde_yaml::from_str(&contents).map_err(parse_error)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url '{}': {}", self.api.base_url, e))?;
    if self.search.recent_limit == 0 {
      return Err(eyre!("search.recent_limit must be at least 1"));
    }
    Ok(())
  }
}

#[derive(Deserialize)]
struct PartialConfig {
  #[serde(default)]
  cache: CacheConfig,
  #[serde(default)]
  search: SearchConfig,
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_defaults_fill_missing_sections() {
    let file = write_config("api:\n  base_url: https://tasks.example.com/api.v1\n");
    let config = Config::load_with(Some(file.path()), None).unwrap();

    assert_eq!(config.api.base_url, "https://tasks.example.com/api.v1");
    assert_eq!(config.cache.stale_time(), Duration::from_secs(30));
    assert_eq!(config.cache.gc_time(), Duration::from_secs(300));
    assert_eq!(config.cache.query_retry().max_retries, 2);
    assert_eq!(config.cache.mutation_retry().max_retries, 1);
    assert_eq!(config.search.options(), SearchOptions::default());
    assert_eq!(config.search.recent_limit, 5);
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let file = write_config(
      "api:\n  base_url: http://localhost:8080\ncache:\n  stale_time_secs: 5\nsearch:\n  min_length: 2\n",
    );
    let config = Config::load_with(Some(file.path()), None).unwrap();

    assert_eq!(config.cache.stale_time(), Duration::from_secs(5));
    assert_eq!(config.cache.query_retries, 2);
    assert_eq!(config.search.min_length, 2);
    assert_eq!(config.search.debounce_ms, 500);
  }

  #[test]
  fn test_gc_time_flows_into_cache_options() {
    let file = write_config("api:\n  base_url: http://localhost:8080\ncache:\n  gc_time_secs: 60\n");
    let config = Config::load_with(Some(file.path()), None).unwrap();

    let options = config.cache.options();
    assert_eq!(options.gc_time, Duration::from_secs(60));
    assert_eq!(options.stale_time, Duration::from_secs(30));
    assert_eq!(options.retry.max_retries, 2);
  }

  #[test]
  fn test_env_url_overrides_file() {
    let file = write_config("api:\n  base_url: http://localhost:8080\nsearch:\n  recent_limit: 3\n");
    let config =
      Config::load_with(Some(file.path()), Some("https://prod.example.com".to_string())).unwrap();

    assert_eq!(config.api.base_url, "https://prod.example.com");
    assert_eq!(config.search.recent_limit, 3);
  }

  #[test]
  fn test_env_url_allows_file_without_api_section() {
    let file = write_config("cache:\n  query_retries: 0\n");
    let config =
      Config::load_with(Some(file.path()), Some("https://prod.example.com".to_string())).unwrap();

    assert_eq!(config.cache.query_retry().max_retries, 0);
  }

  #[test]
  fn test_missing_explicit_file_is_error() {
    let error = Config::load_with(Some(Path::new("/nonexistent/taskdeck.yaml")), None).unwrap_err();
    assert!(error.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    let file = write_config("api:\n  base_url: not a url\n");
    let error = Config::load_with(Some(file.path()), None).unwrap_err();
    assert!(error.to_string().contains("Invalid api.base_url"));
  }

  #[test]
  fn test_malformed_yaml_is_error() {
    let file = write_config("api: [unclosed\n");
    let error = Config::load_with(Some(file.path()), None).unwrap_err();
    assert!(error.to_string().contains("Failed to parse config file"));
  }
}
