use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use vible_core::error::VibleError;

/// Envelope returned by every JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Serialize `data` into a success envelope.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(data).map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(Self::success(value))
    }

    pub fn error(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = match &self.error {
            Some(error) => error.status_code(),
            None => StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl From<VibleError> for ApiError {
    fn from(err: VibleError) -> Self {
        match err {
            VibleError::NotFound(msg) => Self::not_found(msg),
            VibleError::Unauthorized(msg) => Self::unauthorized(msg),
            VibleError::Validation(msg) => Self::validation(msg),
            VibleError::Timeout(msg) => Self::new("TIMEOUT", msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal("internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ApiResponse::error(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: ApiError = VibleError::Validation("text required".into()).into();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = VibleError::NotFound("run".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = VibleError::Database("connection refused".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("connection refused"));
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::success(serde_json::json!([1]))).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": [1]}));

        let err = serde_json::to_value(ApiResponse::error(ApiError::unauthorized("no user")))
            .unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"]["code"], "UNAUTHORIZED");
        assert!(err.get("data").is_none());
    }
}
