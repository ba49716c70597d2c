use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bus_engine::{EngineError, ErrorKind};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Payment => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // storage details are logged by the engine, not returned
        match err {
            EngineError::Storage(_) => Self::internal("database error"),
            other => Self::new(status, other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            detail: self.detail.as_str(),
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bus_engine::BookingStatus;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let cases = [
            (EngineError::InvalidSeatCount, StatusCode::BAD_REQUEST),
            (EngineError::not_found("trip", "t-1"), StatusCode::NOT_FOUND),
            (EngineError::SeatsAlreadyBooked, StatusCode::CONFLICT),
            (
                EngineError::InvalidTransition {
                    from: BookingStatus::Failed,
                    to: BookingStatus::Canceled,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::OperatorOffline, StatusCode::FORBIDDEN),
            (EngineError::InvalidSignature, StatusCode::UNAUTHORIZED),
            (EngineError::InsufficientFunds, StatusCode::PAYMENT_REQUIRED),
            (EngineError::RefundFailed("timeout".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn storage_errors_have_a_generic_detail() {
        let api = ApiError::from(EngineError::Storage("ticket insert"));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.detail, "database error");
    }

    #[test]
    fn not_found_detail_names_the_entity() {
        let api = ApiError::from(EngineError::not_found("booking", "b-9"));
        assert_eq!(api.detail, "booking not found");
    }
}
