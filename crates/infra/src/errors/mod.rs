//! Infrastructure error conversions

mod conversions;

pub use conversions::{map_http_error, InfraError};
