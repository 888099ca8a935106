use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error kinds surfaced on the HTTP boundary, with a stable status mapping.
///
/// Handlers return `Result<_, ApiError>`; everything that is not one of
/// these kinds is an internal error and must not leak details to clients.
#[derive(Debug)]
pub enum ApiError {
	BadRequest(String),
	Unauthorized(String),
	NotFound(String),
	PayloadTooLarge(String),
	RateLimited { detail: String, retry_after: u64 },
	/// A dataset whose atlas failed to load; other datasets keep serving.
	DatasetUnavailable(String),
	Internal(String),
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match self {
			ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
			ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
			ApiError::DatasetUnavailable(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn detail(&self) -> &str {
		match self {
			ApiError::BadRequest(detail)
			| ApiError::Unauthorized(detail)
			| ApiError::NotFound(detail)
			| ApiError::PayloadTooLarge(detail)
			| ApiError::RateLimited { detail, .. }
			| ApiError::DatasetUnavailable(detail)
			| ApiError::Internal(detail) => detail,
		}
	}
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.status(), self.detail())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if matches!(self, ApiError::Internal(_)) {
			log::error!("internal error: {}", self.detail());
		}
		let mut response = (self.status(), Json(json!({ "detail": self.detail() }))).into_response();
		if let ApiError::RateLimited { retry_after, .. } = &self {
			if let Ok(value) = retry_after.to_string().parse() {
				response.headers_mut().insert("Retry-After", value);
			}
		}
		response
	}
}

impl From<anyhow::Error> for ApiError {
	fn from(err: anyhow::Error) -> ApiError {
		ApiError::Internal(format!("{err:#}"))
	}
}
