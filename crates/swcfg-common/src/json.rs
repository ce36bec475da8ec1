//! JSON result envelope.
//!
//! Every command answers with `{"ret":"<CODE>"}` or
//! `{"ret":"<CODE>","data":<value>}`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{DatastoreError, ResultCode};

/// A single command response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ret: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    /// `{"ret":"OK"}`
    pub fn ok() -> Self {
        Self {
            ret: ResultCode::Ok,
            data: None,
        }
    }

    /// `{"ret":"OK","data":...}`
    pub fn ok_with(data: Value) -> Self {
        Self {
            ret: ResultCode::Ok,
            data: Some(data),
        }
    }

    /// Renders an error; described errors carry their message as `data`.
    pub fn from_error(err: &DatastoreError) -> Self {
        Self {
            ret: err.result_code(),
            data: err.message().map(|m| Value::String(m.to_string())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ret.is_ok()
    }

    /// Serializes the envelope on a single line.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(s) => s,
            Err(e) => format!(
                "{{\"ret\":\"{}\",\"data\":{}}}",
                ResultCode::OutputFailure,
                Value::String(e.to_string())
            ),
        }
    }
}

impl From<Result<Reply, DatastoreError>> for Reply {
    fn from(res: Result<Reply, DatastoreError>) -> Self {
        match res {
            Ok(reply) => reply,
            Err(e) => Reply::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_ok_without_data() {
        assert_eq!(Reply::ok().to_json(), r#"{"ret":"OK"}"#);
    }

    #[test]
    fn test_ok_with_data() {
        let reply = Reply::ok_with(json!([{"name": ":a"}]));
        assert_eq!(reply.to_json(), r#"{"ret":"OK","data":[{"name":":a"}]}"#);
    }

    #[test]
    fn test_error_rendering() {
        let err = DatastoreError::interp(ResultCode::InvalidArgs, "sub_cmd = hoge.");
        assert_eq!(
            Reply::from_error(&err).to_json(),
            r#"{"ret":"INVALID_ARGS","data":"sub_cmd = hoge."}"#
        );

        let err = DatastoreError::not_found();
        assert_eq!(Reply::from_error(&err).to_json(), r#"{"ret":"NOT_FOUND"}"#);
    }
}
