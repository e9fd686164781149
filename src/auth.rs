//! Login state: authenticating against the API and keeping the session
//! cookies between runs.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::client::ApiClient;
use crate::api::transport::LoginRedirect;
use crate::api::types::{TaskPage, User};
use crate::error::ApiError;
use crate::query::{KeyPrefix, QueryCache};
use crate::storage::{SqliteStorage, StoredSession};

pub struct Auth {
  api: ApiClient,
  cache: QueryCache<TaskPage>,
  storage: Option<Arc<SqliteStorage>>,
  base_url: String,
}

impl Auth {
  pub fn new(api: ApiClient, cache: QueryCache<TaskPage>, base_url: impl Into<String>) -> Self {
    Self {
      api,
      cache,
      storage: None,
      base_url: base_url.into(),
    }
  }

  pub fn with_storage(mut self, storage: Arc<SqliteStorage>) -> Self {
    self.storage = Some(storage);
    self
  }

  /// The session saved by a previous login, if any.
  pub fn stored_session(&self) -> Option<StoredSession> {
    let storage = self.storage.as_ref()?;
    match storage.session(&self.base_url) {
      Ok(session) => session,
      Err(e) => {
        warn!(error = %e, "Failed to read stored session");
        None
      }
    }
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
    let user = self.api.login(email.trim(), password).await?;
    info!(user = %user.email, "Logged in");
    self.persist(Some(&user));
    Ok(user)
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
    let user = self.api.register(name.trim(), email.trim(), password).await?;
    info!(user = %user.email, "Registered");
    self.persist(Some(&user));
    Ok(user)
  }

  /// Ask the server who we are and refresh the cached user.
  pub async fn current_user(&self) -> Result<User, ApiError> {
    let user = self.api.current_user().await?;
    self.persist(Some(&user));
    Ok(user)
  }

  /// Renew the session cookies, keeping the saved user.
  pub async fn refresh(&self) -> Result<(), ApiError> {
    self.api.refresh().await?;
    info!("Session refreshed");
    let user = self.stored_session().and_then(|s| s.user);
    self.persist(user.as_ref());
    Ok(())
  }

  /// End the session on the server, then forget it locally.
  ///
  /// Local state is dropped even when the server call fails, so a dead
  /// session never sticks around. Cached task data goes with it.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let result = self.api.logout().await;
    if let Err(e) = &result {
      warn!(error = %e, "Server logout failed, clearing local session anyway");
    }

    self.cache.remove(&KeyPrefix::all_tasks());
    if let Some(storage) = &self.storage {
      if let Err(e) = storage.clear_session(&self.base_url) {
        warn!(error = %e, "Failed to clear stored session");
      }
    }
    result
  }

  fn persist(&self, user: Option<&User>) {
    let Some(storage) = &self.storage else {
      return;
    };
    let Some(cookies) = self.api.session() else {
      warn!("Server did not set session cookies");
      return;
    };
    if let Err(e) = storage.save_session(&self.base_url, &cookies, user) {
      warn!(error = %e, "Failed to save session");
    }
  }
}

/// On 401, forget the stored session so the next run asks for a login.
pub struct ClearSessionRedirect {
  storage: Arc<SqliteStorage>,
  base_url: String,
}

impl ClearSessionRedirect {
  pub fn new(storage: Arc<SqliteStorage>, base_url: impl Into<String>) -> Self {
    Self {
      storage,
      base_url: base_url.into(),
    }
  }
}

impl LoginRedirect for ClearSessionRedirect {
  fn redirect_to_login(&self) {
    warn!("Session rejected by the server, login required");
    if let Err(e) = self.storage.clear_session(&self.base_url) {
      warn!(error = %e, "Failed to clear stored session");
    }
  }
}
