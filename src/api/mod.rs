//! Remote task API: transport, typed client and wire types.

pub mod client;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use transport::{HttpTransport, LogRedirect, LoginRedirect, Transport};
pub use types::{
  CreateTaskInput, Priority, Status, Task, TaskFilter, TaskPage, UpdateTaskInput, User,
};
