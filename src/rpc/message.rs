// src/rpc/message.rs
//! JSON-RPC 2.0 framing as spoken by Moonraker's websocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RpcError;

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", method, params, id }
    }
}

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawIncoming {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawErrorBody>,
}

/// A decoded frame from the server.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    Response { id: u64, outcome: Result<Value, RpcError> },
    Notification { method: String, params: Vec<Value> },
}

impl Incoming {
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        let raw: RawIncoming =
            serde_json::from_str(text).map_err(|e| RpcError::Protocol(e.to_string()))?;

        if let Some(id) = raw.id {
            let outcome = match raw.error {
                Some(err) => Err(RpcError::Remote { code: err.code, message: err.message }),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            return Ok(Incoming::Response { id, outcome });
        }

        match raw.method {
            Some(method) => {
                let params = match raw.params {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(Incoming::Notification { method, params })
            }
            None => Err(RpcError::Protocol("frame has neither id nor method".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_missing_params() {
        let text = serde_json::to_string(&RpcRequest::new(7, "printer.info", None)).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","method":"printer.info","id":7}"#);
    }

    #[test]
    fn parses_result_and_error_responses() {
        let ok = Incoming::parse(r#"{"jsonrpc":"2.0","result":{"state":"ready"},"id":3}"#).unwrap();
        assert_eq!(ok, Incoming::Response { id: 3, outcome: Ok(json!({"state": "ready"})) });

        let err = Incoming::parse(
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":4}"#,
        )
        .unwrap();
        assert_eq!(
            err,
            Incoming::Response {
                id: 4,
                outcome: Err(RpcError::Remote { code: -32601, message: "Method not found".into() })
            }
        );
    }

    #[test]
    fn parses_notifications_with_positional_params() {
        let frame = r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{"extruder":{"temperature":210.5}},1234.5]}"#;
        match Incoming::parse(frame).unwrap() {
            Incoming::Notification { method, params } => {
                assert_eq!(method, "notify_status_update");
                assert_eq!(params.len(), 2);
                assert_eq!(params[0]["extruder"]["temperature"], json!(210.5));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let bare = Incoming::parse(r#"{"jsonrpc":"2.0","method":"notify_klippy_ready"}"#).unwrap();
        assert_eq!(bare, Incoming::Notification { method: "notify_klippy_ready".into(), params: vec![] });
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Incoming::parse("not json"), Err(RpcError::Protocol(_))));
        assert!(matches!(Incoming::parse("{}"), Err(RpcError::Protocol(_))));
    }
}
