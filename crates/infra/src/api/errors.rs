//! Mapping of non-2xx responses onto the domain error

use circlepay_domain::CirclePayError;
use reqwest::StatusCode;

/// Body fields checked, in order, for a server-provided message.
const MESSAGE_FIELDS: [&str; 3] = ["detail", "message", "error"];

/// Build the `Http` error for a non-2xx response.
///
/// The message comes from the JSON body's `detail`, `message` or `error`
/// field when one is a string, otherwise from the status reason phrase.
pub fn error_from_status(status: StatusCode, body: &str) -> CirclePayError {
    let message = message_from_body(body).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("request failed").to_string()
    });
    CirclePayError::Http { status: status.as_u16(), message }
}

fn message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    MESSAGE_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(serde_json::Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_detail_then_message_then_error() {
        let err = error_from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "second", "detail": "first"}"#,
        );
        assert_eq!(err, CirclePayError::Http { status: 422, message: "first".into() });

        let err = error_from_status(StatusCode::BAD_REQUEST, r#"{"error": "bad chain"}"#);
        assert_eq!(err, CirclePayError::Http { status: 400, message: "bad chain".into() });
    }

    #[test]
    fn falls_back_to_reason_phrase() {
        let err = error_from_status(StatusCode::BAD_GATEWAY, "<html>upstream</html>");
        assert_eq!(err, CirclePayError::Http { status: 502, message: "Bad Gateway".into() });

        // Structured but non-string detail, as FastAPI validation errors are.
        let err = error_from_status(StatusCode::UNPROCESSABLE_ENTITY, r#"{"detail": [{"loc": []}]}"#);
        assert_eq!(err.status(), Some(422));
        assert!(!err.is_retryable());
    }
}
