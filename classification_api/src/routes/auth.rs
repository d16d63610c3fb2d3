use crate::server::SharedState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Single equality check between the request header and the configured
/// secret. Any miss gets the same rejection, no detail leaked.
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !key_matches(provided, &state.application.api_key) {
        tracing::warn!("Unauthorized API access attempt");
        return rejection();
    }

    next.run(request).await
}

fn key_matches(provided: Option<&str>, expected: &str) -> bool {
    provided == Some(expected)
}

fn rejection() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "detail": "You are not authorized to use this API" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_rejected() {
        assert!(!key_matches(None, "secret"));
    }

    #[test]
    fn wrong_key_is_rejected() {
        assert!(!key_matches(Some("guess"), "secret"));
        assert!(!key_matches(Some(""), "secret"));
        assert!(!key_matches(Some("secret "), "secret"));
    }

    #[test]
    fn matching_key_is_accepted() {
        assert!(key_matches(Some("secret"), "secret"));
    }

    #[test]
    fn rejection_is_uniform() {
        assert_eq!(rejection().status(), StatusCode::FORBIDDEN);
    }
}
