//! Axum mapping for guard verdicts

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use toll_common::{GuardError, GuardResult};

use crate::pipeline::GuardResponse;

impl IntoResponse for GuardResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.body)).into_response();
        let header_map = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                header_map.insert(name, value);
            }
        }
        response
    }
}

/// Map a guard error to its HTTP response
pub fn error_response(err: &GuardError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.body())).into_response()
}

/// Map a full pipeline result to an HTTP response
pub fn respond(result: GuardResult<GuardResponse>) -> Response {
    match result {
        Ok(verdict) => verdict.into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_headers_land_on_the_response() {
        let verdict = GuardResponse {
            status: 200,
            body: json!({"ok": true}),
            headers: vec![
                ("X-RateLimit-Limit", "60".to_string()),
                ("X-RateLimit-Remaining", "59".to_string()),
                ("X-RateLimit-Reset", "1735689600".to_string()),
            ],
            replayed: false,
            credits_charged: None,
        };
        let response = verdict.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
    }

    #[test]
    fn upstream_failure_maps_to_bad_gateway() {
        let response =
            error_response(&GuardError::UpstreamMeteringFailure("model timeout".into()));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_failure_fails_closed_as_500() {
        let response = respond(Err(GuardError::Internal("store down".into())));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
