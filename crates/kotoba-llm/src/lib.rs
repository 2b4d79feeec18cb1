//! # kotoba-llm
//!
//! Model clients for the kotoba engine.
//!
//! - [`LocalModelClient`] talks to the on-host model server and fronts it
//!   with a two-layer response cache
//! - [`RemoteModelClient`] talks to the signed remote endpoint and is
//!   admission-controlled by the [`UsageLedger`]
//! - [`retry`] provides the shared exponential-backoff driver
//! - [`signing`] provides the injected request-signer capability
//!
//! Tier processors depend on the [`LocalGenerate`] / [`RemoteGenerate`]
//! capability traits rather than the concrete clients, so tests can
//! substitute mocks.

pub mod cache;
pub mod error;
pub mod local;
pub mod remote;
pub mod retry;
pub mod signing;
pub mod usage;

pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use error::{LocalModelError, RemoteModelError};
pub use local::{GenerateOptions, LocalGenerate, LocalModelClient};
pub use remote::{RemoteGenerate, RemoteModelClient};
pub use retry::{compute_delay, retry_async, RetryConfig};
pub use signing::{HmacSigner, NoopSigner, RequestSigner};
pub use usage::{estimate_tokens, UsageLedger, UsageRecord, UsageSummary};
