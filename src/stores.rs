use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;

/// A response saved under an idempotency key, together with the hash of the
/// request input that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotentData {
    pub status: u16,
    pub body: String,
    pub input_hash: [u8; 32],
}

impl IdempotentData {
    pub fn new(status: StatusCode, body: Bytes, input_hash: [u8; 32]) -> Self {
        IdempotentData {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).to_string(),
            input_hash,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("idempotent store error: {0}")]
pub struct IdempotentStoreError(pub String);

/// Store used by the API to replay responses for repeated requests that carry
/// the same `Idempotency-Key` header.
#[async_trait]
pub trait IdempotentEngineStore {
    /// Returns the data saved under `idempotency_key`, if any
    async fn load_idempotent_data(
        &self,
        idempotency_key: String,
    ) -> Result<Option<IdempotentData>, IdempotentStoreError>;

    /// Saves the response produced for `idempotency_key`
    async fn save_idempotent_data(
        &self,
        idempotency_key: String,
        input_hash: [u8; 32],
        status_code: StatusCode,
        data: Bytes,
    ) -> Result<(), IdempotentStoreError>;
}
