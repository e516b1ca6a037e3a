//! API error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courierdesk_billing::LedgerError;
use serde_json::json;

use crate::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientPermissions => ApiError::Forbidden,
            _ => ApiError::Unauthorized,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, extra) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
                None,
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Insufficient permissions".to_string(),
                None,
            ),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::NotSupported(msg) => (StatusCode::NOT_IMPLEMENTED, msg.clone(), None),
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidAmount(_)
                | LedgerError::InvalidCost(_)
                | LedgerError::UnknownFeature(_) => (StatusCode::BAD_REQUEST, err.to_string(), None),
                LedgerError::InsufficientCredit { balance, required } => (
                    StatusCode::PAYMENT_REQUIRED,
                    err.to_string(),
                    Some(json!({ "balance": balance, "required": required })),
                ),
                LedgerError::NothingToRefund(_) => (StatusCode::CONFLICT, err.to_string(), None),
                LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, err.to_string(), None),
                LedgerError::Database(_) | LedgerError::Config(_) | LedgerError::Internal(_) => {
                    tracing::error!(error = %err, "Ledger infrastructure error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                        None,
                    )
                }
            },
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16(),
        });
        if let (Some(body), Some(serde_json::Value::Object(extra))) = (body.as_object_mut(), extra)
        {
            body.extend(extra);
        }

        (status, Json(body)).into_response()
    }
}
