use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_carry_status_and_message() {
        let (status, body) = bad_request("bad bbox");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "bad bbox");

        let (status, body) = not_found("vehicle not found");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "vehicle not found");
    }
}
