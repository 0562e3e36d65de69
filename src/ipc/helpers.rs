use crate::error::FormsError;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

/// The user a request acts for. There is no ambient session: callers pass it.
pub fn acting_user(params: &Value) -> Result<String, FormsError> {
    match params.get("actingUserId").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(FormsError::NotAuthenticated),
    }
}

pub fn optional_acting_user(params: &Value) -> Option<String> {
    params
        .get("actingUserId")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_str(params: &Value, key: &str) -> Result<String, FormsError> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(FormsError::validation(format!("missing {}", key))),
    }
}

/// `Ok(None)` when absent or null; a non-string value is rejected.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, FormsError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FormsError::validation(format!("{} must be a string", key))),
    }
}

pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, FormsError> {
    serde_json::from_value(params.clone())
        .map_err(|e| FormsError::validation(format!("invalid params: {}", e)))
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
