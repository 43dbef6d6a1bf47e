use actix_web::{http::StatusCode, HttpResponse};
use serde_json::json;

/// Gateway error taxonomy mapped onto HTTP responses.
///
/// Every variant renders a JSON body of the shape `{"error": "..."}` so
/// clients always get a machine-readable reason on non-2xx responses.
/// Persistence failures (`Io`) are internal: services log and swallow them,
/// they never fail a user request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("Too many registration attempts, slow down")]
    RegistrationVelocity,
    #[error("{0} not found")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Io(#[from] std::io::Error),
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Authorization(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RegistrationVelocity => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        match self {
            GatewayError::RateLimited { retry_after_secs } => {
                HttpResponse::TooManyRequests().json(json!({
                    "error": message,
                    "retryAfter": retry_after_secs
                }))
            }
            _ => HttpResponse::build(self.status_code()).json(json!({ "error": message })),
        }
    }
}
