//! Translation of admin app error responses into user-facing messages.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error as ThisError;
use tracing::error;

pub const GENERIC_MESSAGE: &str = "Something went wrong. Please retry in a while.";
const AUTH_MESSAGE: &str = "Authentication error due to invalid credentials.";
const AUTHORIZATION_MESSAGE: &str = "Authorization error due to invalid access.";
const SERVER_MESSAGE: &str = "The server has errored. Please retry in some time.";
const MULTIPLE_ERRORS_MESSAGE: &str = "Banking Action has failed due to the following error(s):";
const CONSENT_NOT_GRANTED: &str = "CONSENT.RESOURCE_NOT_GRANTED";
const CONSENT_HINT: &str = "Please go to Banking Settings and click on Link Bank and Accounts.";

/// An error reported by the admin app, ready to show to the user.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct BankingError {
    /// HTTP status of the failed response, if there was one.
    pub status: Option<u16>,
    pub message: String,
}

impl BankingError {
    pub fn new(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            status: status.map(|s| s.as_u16()),
            message: message.into(),
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_some_and(|s| (500..600).contains(&s))
    }
}

/// Map a failed admin app response to a [`BankingError`].
///
/// Checked in order: authentication (401), authorization (403), non-JSON
/// bodies (gateway pages), framework exceptions without a `message`, then
/// the admin app's own `error`/`data` payloads.
pub fn classify_error(status: StatusCode, content_type: Option<&str>, body: &[u8]) -> BankingError {
    let err = |message: &str| BankingError::new(Some(status), message);
    let raw = String::from_utf8_lossy(body);

    if status == StatusCode::UNAUTHORIZED {
        error!(status = status.as_u16(), body = %raw, "Banking Error");
        return err(AUTH_MESSAGE);
    }

    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    if status == StatusCode::FORBIDDEN {
        error!(status = status.as_u16(), body = %raw, "Banking Error");
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or(AUTHORIZATION_MESSAGE);
        return err(message);
    }

    let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
    let Some(response) = parsed.filter(|_| is_json) else {
        error!(status = status.as_u16(), body = %raw, "Banking Error");
        return err(GENERIC_MESSAGE);
    };

    let content = response.get("message").filter(|c| !is_blank(c));
    let Some(content) = content else {
        error!(status = status.as_u16(), body = %raw, "Banking Error");
        if response.get("exc_type").is_some() {
            let message = response
                .get("exception")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(SERVER_MESSAGE);
            return err(message);
        }
        return err(GENERIC_MESSAGE);
    };

    if let Value::String(message) = content {
        error!(status = status.as_u16(), message = %message, "Banking Error");
        return err(message.as_str());
    }

    let error_data = content
        .get("error")
        .filter(|v| !is_blank(v))
        .or_else(|| content.get("data").filter(|v| !is_blank(v)));
    let Some(error_data) = error_data else {
        error!(status = status.as_u16(), "Banking Error without error details");
        return err(GENERIC_MESSAGE);
    };

    // error payloads carry no credentials and are safe to log
    error!(status = status.as_u16(), error = %error_data, "Banking Error");

    if let Some(errors) = error_data
        .get("errors")
        .and_then(Value::as_array)
        .filter(|e| !e.is_empty())
    {
        let lines: Vec<String> = errors
            .iter()
            .map(|e| {
                let location = e.get("location").and_then(Value::as_str).unwrap_or("-");
                format!("- {location} - {}", message_with_hint(e))
            })
            .collect();
        let message = format!("{MULTIPLE_ERRORS_MESSAGE}\n{}", lines.join("\n"));
        return err(message.as_str());
    }

    if error_data.get("message").is_some_and(|m| !is_blank(m)) {
        return err(message_with_hint(error_data).as_str());
    }

    err(GENERIC_MESSAGE)
}

/// The error's message, plus instructions for errors the user can fix.
fn message_with_hint(error: &Value) -> String {
    let msg = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if error.get("code").and_then(Value::as_str) == Some(CONSENT_NOT_GRANTED) {
        format!("{msg} {CONSENT_HINT}")
    } else {
        msg.to_string()
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const JSON: Option<&str> = Some("application/json; charset=utf-8");

    fn classify(status: u16, body: Value) -> BankingError {
        let status = StatusCode::from_u16(status).unwrap();
        classify_error(status, JSON, body.to_string().as_bytes())
    }

    #[test]
    fn unauthorized_means_bad_credentials() {
        let e = classify(401, json!({"message": "whatever"}));
        assert_eq!(e.message, AUTH_MESSAGE);
        assert_eq!(e.status, Some(401));
    }

    #[test]
    fn forbidden_uses_string_message_when_given() {
        assert_eq!(
            classify(403, json!({"message": "Subscription expired"})).message,
            "Subscription expired"
        );
        assert_eq!(
            classify(403, json!({"message": {"detail": 1}})).message,
            AUTHORIZATION_MESSAGE
        );
    }

    #[test]
    fn html_gateway_pages_are_generic() {
        let e = classify_error(
            StatusCode::BAD_GATEWAY,
            Some("text/html"),
            b"<html>502 Bad Gateway</html>",
        );
        assert_eq!(e.message, GENERIC_MESSAGE);
        assert!(e.is_server_error());
    }

    #[test]
    fn framework_exceptions() {
        let e = classify(
            500,
            json!({"exc_type": "ValidationError", "exception": "ValidationError: bad input"}),
        );
        assert_eq!(e.message, "ValidationError: bad input");

        let e = classify(500, json!({"exc_type": "TimeoutError"}));
        assert_eq!(e.message, SERVER_MESSAGE);
    }

    #[test]
    fn multiple_admin_errors_are_listed() {
        let e = classify(
            400,
            json!({"message": {"error": {"errors": [
                {"location": "iban", "message": "Invalid IBAN"},
                {"location": "consent", "message": "Consent missing", "code": CONSENT_NOT_GRANTED}
            ]}}}),
        );
        assert_eq!(
            e.message,
            format!(
                "{MULTIPLE_ERRORS_MESSAGE}\n- iban - Invalid IBAN\n- consent - Consent missing {CONSENT_HINT}"
            )
        );
    }

    #[test]
    fn single_admin_error_gets_consent_hint() {
        let e = classify(
            400,
            json!({"message": {"data": {"message": "Access denied", "code": CONSENT_NOT_GRANTED}}}),
        );
        assert_eq!(e.message, format!("Access denied {CONSENT_HINT}"));

        let e = classify(400, json!({"message": {"error": {"message": "Unknown customer"}}}));
        assert_eq!(e.message, "Unknown customer");
    }

    #[test]
    fn unrecognised_payloads_fall_back_to_generic() {
        assert_eq!(classify(400, json!({"message": {"error": {}}})).message, GENERIC_MESSAGE);
        assert_eq!(classify(400, json!({})).message, GENERIC_MESSAGE);
    }
}
