//! CirclePay backend access
//!
//! - [`gateway`]: authenticated JSON requests with caching, retry and refresh
//! - [`auth`]: credential storage and token refresh
//! - [`endpoints`]: business endpoints, also the sync action dispatcher
//! - [`errors`]: status-to-error mapping

pub mod auth;
pub mod endpoints;
pub mod errors;
pub mod gateway;

pub use auth::{CredentialStore, RefreshResponse, TokenRefresher};
pub use endpoints::CirclePayApi;
pub use errors::error_from_status;
pub use gateway::{RequestGateway, RequestOptions};
