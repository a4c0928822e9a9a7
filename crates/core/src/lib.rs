//! Tally core types and utilities
//!
//! Owns the client-side session: the token pair issued by the backend, the
//! identity decoded from it, and the durable slot it is persisted to.

pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod token;
pub mod tracing;

pub use config::{ApiSettings, SessionSettings, Settings};
pub use error::{CoreError, CoreResult, DecodeError, SessionError};
pub use session::{LogoutListener, LogoutReason, SessionOptions, SessionStore};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use token::{Identity, TokenPair};
