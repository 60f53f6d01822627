/// Uniform result shape returned by every action.
///
/// Errors are never raised to the caller: they are rendered into `message`
/// with `status` set to [`STATUS_ERROR`].
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub status: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RunResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Render an error together with its whole `source()` chain.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // thiserror's `{0}` formatting often repeats the inner message
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failed")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_serializes_null_data() {
        let res = RunResponse::ok("Success");
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v, json!({"status": 0, "message": "Success", "data": null}));
    }

    #[test]
    fn test_error_status() {
        let res = RunResponse::error("boom");
        assert_eq!(res.status, STATUS_ERROR);
        assert!(!res.is_ok());
    }

    #[test]
    fn test_error_chain_includes_source() {
        let err = Outer(std::io::Error::other("disk gone"));
        assert_eq!(error_chain(&err), "outer failed: disk gone");
    }

    #[test]
    fn test_missing_data_deserializes() {
        let res: RunResponse = serde_json::from_str(r#"{"status":0,"message":"x"}"#).unwrap();
        assert!(res.data.is_none());
    }
}
