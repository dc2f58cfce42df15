//! # Ledger Gateway
//!
//! Crate containing the HTTP surface of the ledger bridge. An API is created by
//! giving it an object which implements the [`GatewayEngine`] trait and a store
//! implementing [`stores::IdempotentEngineStore`]. Engines live under the
//! `crates` directory, one per ledger network they speak to.

use async_trait::async_trait;
use bytes::Bytes;

mod api;
mod error;
pub mod stores;

pub use self::api::create_gateway_filter;
pub use self::error::ApiError;
pub use warp::http::StatusCode;

/// Status and JSON body produced by an engine call.
pub type ApiResponse = (StatusCode, Bytes);

/// Trait consumed by the gateway HTTP API. Every engine MUST implement this
/// trait so that it can be exposed over the API. Request bodies are handed
/// over undecoded so that engines own their wire types and their validation
/// errors.
#[async_trait]
pub trait GatewayEngine {
    /// `POST /builder`: assembles and signs a transaction from a list of
    /// operations, returning its envelope.
    async fn build_transaction(&self, body: Bytes) -> Result<ApiResponse, ApiError>;

    /// `POST /payment`: sends a payment from an account controlled by the
    /// gateway.
    async fn send_payment(&self, body: Bytes) -> Result<ApiResponse, ApiError>;

    /// `POST /authorize`: allows an account to hold one of the gateway's
    /// assets.
    async fn authorize(&self, body: Bytes) -> Result<ApiResponse, ApiError>;

    /// `POST /create-keypair`
    async fn create_keypair(&self) -> Result<ApiResponse, ApiError>;

    /// `POST /reprocess`: drives delivery of a received payment again.
    async fn reprocess(&self, body: Bytes) -> Result<ApiResponse, ApiError>;

    /// `GET /tx_status?id=`
    async fn tx_status(&self, id: Option<String>) -> Result<ApiResponse, ApiError>;
}
