use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drop_store::DropError;
use serde_json::json;

#[derive(Debug)]
pub struct DropAxumError(pub anyhow::Error);

impl From<anyhow::Error> for DropAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<DropError> for DropAxumError {
    fn from(e: DropError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

/// Status code for a store error
pub fn status_for(err: &DropError) -> StatusCode {
    match err {
        DropError::SizeLimitExceeded { .. } | DropError::UploadTooLarge { .. } => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        DropError::SessionInvalid { .. } | DropError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        DropError::NotFound { .. } => StatusCode::NOT_FOUND,
        DropError::WaitTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for DropAxumError {
    fn into_response(self) -> Response {
        // Look through anyhow contexts for the store error
        if let Some(err) = self.0.chain().find_map(|e| e.downcast_ref::<DropError>()) {
            let status = status_for(err);
            let message = if err.is_storage_failure() {
                tracing::error!(error = %err, "storage failure");
                "Storage failure".to_string()
            } else {
                err.to_string()
            };
            return (status, Json(json!({ "message": message }))).into_response();
        }

        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": self.0.to_string() })),
        )
            .into_response()
    }
}
