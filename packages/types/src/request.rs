use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

/// A function call handed to the fulfillment bridge through the inbound queue.
///
/// The wire names match what existing producers publish, so the struct fields
/// are renamed rather than following the crate's snake_case.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionRequest {
    #[serde(rename = "ReqId", alias = "RequestId")]
    pub request_id: String,
    #[serde(rename = "RequestURL")]
    pub request_url: String,
    #[serde(rename = "Body", default)]
    pub body: serde_json::Value,
}

/// Outcome of one function request. Exactly one of `resp` / `err` is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct FulfilledRequest {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<Bytes>,
}

impl FulfilledRequest {
    pub fn success(request_id: impl Into<String>, resp: impl Into<Bytes>) -> Self {
        Self {
            request_id: request_id.into(),
            resp: Some(resp.into()),
            err: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            request_id: request_id.into(),
            resp: None,
            err: Some(Bytes::from(err.to_string().into_bytes())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.resp.is_some()
    }

    pub fn err_text(&self) -> Option<String> {
        self.err
            .as_ref()
            .map(|e| String::from_utf8_lossy(e).into_owned())
    }
}
