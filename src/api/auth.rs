// =============================================================================
// Operator Authentication
// =============================================================================
//
// Two surfaces present the same secret in different places: REST handlers
// carry it in the `Authorization: Bearer` header, while the realtime
// WebSocket passes it as a `?token=` query parameter (browsers cannot attach
// headers to an upgrade request). Both funnel through [`AdminToken`], which
// loads the expected value from `MERIDIAN_ADMIN_TOKEN` per request (so
// rotation needs no restart) and compares without short-circuiting, keeping
// response timing independent of how much of the token matched.
// =============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use tracing::warn;

const TOKEN_ENV_VAR: &str = "MERIDIAN_ADMIN_TOKEN";
const BEARER_PREFIX: &str = "Bearer ";

// =============================================================================
// AdminToken — the shared verification core
// =============================================================================

/// The operator secret as configured in the environment.
pub struct AdminToken {
    expected: Vec<u8>,
}

impl AdminToken {
    /// Load the configured token. `None` when the variable is unset or empty,
    /// in which case every authentication attempt must fail closed.
    pub fn from_env() -> Option<Self> {
        let expected = std::env::var(TOKEN_ENV_VAR).ok()?;
        if expected.is_empty() {
            return None;
        }
        Some(Self {
            expected: expected.into_bytes(),
        })
    }

    /// Fixed-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        fixed_time_eq(&self.expected, presented.as_bytes())
    }
}

/// Byte-wise comparison that inspects every position regardless of where the
/// first mismatch sits. Length is compared up front; the attacker does not
/// control the expected token's length, so that branch leaks nothing useful.
fn fixed_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// =============================================================================
// REST path — Authorization header extractor
// =============================================================================

/// Axum extractor gating every authenticated REST handler:
///
///   async fn handler(_auth: AdminAuth, ...) { ... }
///
/// Rejects with 403 before the handler body runs when the server has no token
/// configured, the header is missing or malformed, or the token is wrong.
pub struct AdminAuth;

fn forbidden(message: &'static str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": message })),
    )
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(expected) = AdminToken::from_env() else {
            warn!("{TOKEN_ENV_VAR} is not set — rejecting all authenticated requests");
            return Err(forbidden("Server authentication not configured"));
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER_PREFIX));

        match presented {
            Some(token) if expected.matches(token) => Ok(AdminAuth),
            Some(_) => {
                warn!("invalid admin token presented");
                Err(forbidden("Invalid authorization token"))
            }
            None => {
                warn!("missing or malformed Authorization header");
                Err(forbidden("Missing or invalid authorization token"))
            }
        }
    }
}

// =============================================================================
// WebSocket path — query-parameter verification
// =============================================================================

/// Verify the `?token=` value presented on a WebSocket upgrade. Fails closed
/// when no token is configured.
pub fn verify_query_token(presented: &str) -> bool {
    AdminToken::from_env()
        .map(|expected| expected.matches(presented))
        .unwrap_or(false)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn fixed_time_eq_agrees_with_plain_equality() {
        let cases: [(&[u8], &[u8]); 6] = [
            (b"meridian-ops", b"meridian-ops"),
            (b"meridian-ops", b"meridian-opt"),
            (b"", b""),
            (b"a", b""),
            (b"\x00\xff", b"\x00\xfe"),
            (b"longer-token-value", b"short"),
        ];
        for (a, b) in cases {
            assert_eq!(fixed_time_eq(a, b), a == b, "{a:?} vs {b:?}");
        }
    }

    // Environment mutation is process-global, so every env-dependent
    // assertion lives in this one test to avoid cross-test races.
    #[tokio::test]
    async fn both_auth_paths_share_the_env_token() {
        std::env::set_var(TOKEN_ENV_VAR, "sesame-7");

        // Query path (WebSocket upgrade).
        assert!(verify_query_token("sesame-7"));
        assert!(!verify_query_token("sesame-8"));
        assert!(!verify_query_token(""));

        // Header path (REST extractor).
        let authed = Request::builder()
            .header(AUTHORIZATION, "Bearer sesame-7")
            .body(())
            .unwrap();
        let (mut parts, _) = authed.into_parts();
        assert!(AdminAuth::from_request_parts(&mut parts, &()).await.is_ok());

        let wrong = Request::builder()
            .header(AUTHORIZATION, "Bearer stolen")
            .body(())
            .unwrap();
        let (mut parts, _) = wrong.into_parts();
        assert!(AdminAuth::from_request_parts(&mut parts, &())
            .await
            .is_err());

        // A token without the Bearer prefix is malformed, even when correct.
        let unprefixed = Request::builder()
            .header(AUTHORIZATION, "sesame-7")
            .body(())
            .unwrap();
        let (mut parts, _) = unprefixed.into_parts();
        assert!(AdminAuth::from_request_parts(&mut parts, &())
            .await
            .is_err());

        let bare = Request::builder().body(()).unwrap();
        let (mut parts, _) = bare.into_parts();
        assert!(AdminAuth::from_request_parts(&mut parts, &())
            .await
            .is_err());

        // Unconfigured server fails closed on both paths.
        std::env::remove_var(TOKEN_ENV_VAR);
        assert!(!verify_query_token("sesame-7"));
        let authed = Request::builder()
            .header(AUTHORIZATION, "Bearer sesame-7")
            .body(())
            .unwrap();
        let (mut parts, _) = authed.into_parts();
        assert!(AdminAuth::from_request_parts(&mut parts, &())
            .await
            .is_err());
    }
}
