use ledger_gateway::ApiError;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors surfaced by the bridge components to the request handlers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Client supplied data that failed validation. `field` follows the
    /// request's JSON path, e.g. `operations[1][body][destination]`.
    #[error("invalid parameter {field}: {message}")]
    InvalidParameter {
        field: String,
        value: String,
        message: String,
        data: Map<String, Value>,
    },
    #[error("missing parameter {0}")]
    MissingParameter(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("sequence number {sequence} already used for {account}")]
    SequenceConflict { account: String, sequence: u64 },
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        GatewayError::InvalidParameter {
            field: field.into(),
            value: value.into(),
            message: message.into(),
            data: Map::new(),
        }
    }

    /// Attaches diagnostic data to an `InvalidParameter` error. Other variants
    /// are returned unchanged.
    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        if let GatewayError::InvalidParameter { ref mut data, .. } = self {
            data.insert(key.to_owned(), value);
        }
        self
    }

    /// Prefixes the field path of an `InvalidParameter` error, turning a
    /// body-relative field such as `amount` into `operations[0][body][amount]`.
    pub fn in_field(self, prefix: &str) -> Self {
        match self {
            GatewayError::InvalidParameter {
                field,
                value,
                message,
                data,
            } => {
                let (head, rest) = match field.find('[') {
                    Some(i) => field.split_at(i),
                    None => (field.as_str(), ""),
                };
                GatewayError::InvalidParameter {
                    field: format!("{}[{}]{}", prefix, head, rest),
                    value,
                    message,
                    data,
                }
            }
            other => other,
        }
    }

    /// Rewrites the field path of an `InvalidParameter` error.
    pub fn map_field(self, f: impl FnOnce(&str) -> String) -> Self {
        match self {
            GatewayError::InvalidParameter {
                field,
                value,
                message,
                data,
            } => GatewayError::InvalidParameter {
                field: f(&field),
                value,
                message,
                data,
            },
            other => other,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            GatewayError::InvalidParameter { field, .. } => Some(field),
            GatewayError::MissingParameter(field) => Some(field),
            _ => None,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidParameter {
                field,
                value,
                message,
                data,
            } => data.into_iter().fold(
                ApiError::invalid_parameter(&field, &value, message),
                |err, (key, value)| err.with_data(&key, value),
            ),
            GatewayError::MissingParameter(field) => ApiError::missing_parameter(&field),
            GatewayError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            // Internal details stay in the logs
            GatewayError::SequenceConflict { .. }
            | GatewayError::DeliveryFailure(_)
            | GatewayError::Internal(_) => ApiError::internal_server_error(),
        }
    }
}
