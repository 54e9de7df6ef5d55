pub mod auth;
pub mod chat;
pub mod claims;
pub mod errors;
pub mod files;
pub mod guard;
pub mod persistence;
pub mod realtime;
pub mod state;
pub mod types;
pub mod web_api;

pub use errors::{ErrorCode, ServiceError};
pub use state::ServiceState;
pub use types::*;
