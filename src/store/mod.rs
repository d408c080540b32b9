//! Persistence layer — libSQL-backed storage for call sessions, flow
//! state, event logs, and the webhook queue.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use model::{CallEvent, CallSession, CallStatus, DigitEvent, WebhookStatus, WebhookTask};
pub use traits::CallStore;
