//! # CirclePay Infrastructure
//!
//! Infrastructure implementations of core ports and the composition root.
//!
//! This crate contains:
//! - The reqwest HTTP client and the authenticated request gateway
//! - Token refresh and credential storage
//! - CirclePay business endpoints (also the sync action dispatcher)
//! - A JSON-file key/value store
//! - An HTTP connectivity probe
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `circlepay-core`
//! - Depends on `circlepay-common`, `circlepay-domain` and `circlepay-core`
//! - Contains all "impure" code (network, filesystem, environment)

pub mod api;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod http;
pub mod logging;
pub mod stack;
pub mod storage;

// Re-export commonly used items
pub use api::{CirclePayApi, CredentialStore, RequestGateway, RequestOptions, TokenRefresher};
pub use connectivity::{HttpProbe, ProbeReport};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use logging::init_tracing;
pub use stack::{store_for, ResilienceStack};
pub use storage::FileStore;
