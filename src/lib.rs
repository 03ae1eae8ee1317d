//! # inventory-resilience
//!
//! Resilient data-access client for the inventory backend.
//!
//! Every call from UI code goes through one fixed stack before it reaches the network:
//!
//! ```text
//! interceptors -> GlobalThrottle -> RequestDeduplicator (GET only)
//!              -> CircuitBreaker (per category) -> RetryPolicy -> Transport
//! ```
//!
//! The stack absorbs transient failures (retry with exponential backoff), stops hammering a
//! failing subsystem (circuit breakers for products, analytics, auth and everything else),
//! collapses identical concurrent reads into one request, and rejects call storms. A single
//! bearer token is attached to every request and kept in sync with its persisted copy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inventory_resilience::ApiClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> inventory_resilience::Result<()> {
//!     let client = ApiClientBuilder::new()
//!         .base_url("http://localhost:3000/api")
//!         .build()
//!         .await?;
//!
//!     client.login("ops@example.com", "secret").await?;
//!     let products = client.get("/products").await?;
//!     println!("{:?}", products.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | The [`ApiClient`] facade, its builder and the auth surface |
//! | [`resilience`] | Circuit breakers, deduplication, throttling and retry |
//! | [`transport`] | One HTTP attempt and response classification |
//! | [`auth`] | Token ownership and persisted session stores |
//! | [`interceptors`] | Request/response hooks, including endpoint correction |
//! | [`config`] | Defaults, YAML and `INVENTORY_API_*` environment configuration |
//! | [`error`] | The structured [`Error`] returned by every operation |

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod interceptors;
pub mod resilience;
pub mod transport;

pub use auth::{AuthEvent, FileTokenStore, MemoryTokenStore, TokenManager, TokenStore};
pub use client::{ApiClient, ApiClientBuilder, ApiEnvelope, SignalsSnapshot};
pub use config::ResilienceConfig;
pub use error::{Error, ErrorKind, RateLimitSource};
pub use transport::Method;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
