use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of every successful JSON response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn into_response_with(self, status: StatusCode, headers: HeaderMap) -> Response {
        (status, headers, Json(self)).into_response()
    }
}

pub fn reply(status: StatusCode, body: SuccessResponse) -> Response {
    (status, Json(body)).into_response()
}
