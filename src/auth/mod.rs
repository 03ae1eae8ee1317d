//! Bearer token ownership and its persisted, cross-process copy.

pub mod store;
pub mod token;

pub use store::{FileTokenStore, MemoryTokenStore, StoredSession, TokenStore};
pub use token::{AuthEvent, TokenManager};
