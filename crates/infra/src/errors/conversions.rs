//! Conversions from external infrastructure errors into domain errors.

use std::io::Error as IoError;
use std::time::Duration;

use circlepay_domain::CirclePayError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CirclePayError);

impl From<InfraError> for CirclePayError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CirclePayError> for InfraError {
    fn from(value: CirclePayError) -> Self {
        InfraError(value)
    }
}

trait IntoCirclePayError {
    fn into_circlepay(self) -> CirclePayError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CirclePayError */
/* -------------------------------------------------------------------------- */

/// Classify a transport error from a request sent with `timeout`.
///
/// No response means `Network`; a missed deadline means `Timeout`. Status
/// errors only show up here when a caller used `error_for_status`.
pub fn map_http_error(error: HttpError, timeout: Duration) -> CirclePayError {
    if error.is_timeout() {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        return CirclePayError::Timeout { millis };
    }
    error.into_circlepay()
}

impl IntoCirclePayError for HttpError {
    fn into_circlepay(self) -> CirclePayError {
        if self.is_timeout() {
            return CirclePayError::Timeout { millis: 0 };
        }

        if self.is_connect() {
            return CirclePayError::Network(format!("HTTP connection failure: {self}"));
        }

        if let Some(status) = self.status() {
            return CirclePayError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown status").to_string(),
            };
        }

        if self.is_decode() {
            return CirclePayError::Serialization(format!("invalid response body: {self}"));
        }

        CirclePayError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_circlepay())
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → CirclePayError */
/* -------------------------------------------------------------------------- */

impl IntoCirclePayError for IoError {
    fn into_circlepay(self) -> CirclePayError {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::PermissionDenied => {
                CirclePayError::Storage(format!("permission denied: {self}"))
            }
            ErrorKind::InvalidData => CirclePayError::Serialization(self.to_string()),
            _ => CirclePayError::Storage(self.to_string()),
        }
    }
}

impl From<IoError> for InfraError {
    fn from(value: IoError) -> Self {
        InfraError(value.into_circlepay())
    }
}

/* -------------------------------------------------------------------------- */
/* toml / url → CirclePayError */
/* -------------------------------------------------------------------------- */

impl From<toml::de::Error> for InfraError {
    fn from(value: toml::de::Error) -> Self {
        InfraError(CirclePayError::Config(format!("invalid TOML: {value}")))
    }
}

impl From<url::ParseError> for InfraError {
    fn from(value: url::ParseError) -> Self {
        InfraError(CirclePayError::Config(format!("invalid URL: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
