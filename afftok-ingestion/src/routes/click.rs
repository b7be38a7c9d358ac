use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::services::click_service::{handle_click, ClickOutcome, ClickRequestContext};
use crate::AppState;

/// `GET /api/c/:code` — the public click redirect. Component D.
pub async fn click_redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ctx = ClickRequestContext {
        raw_code: code,
        ip: client_ip(&headers, addr),
        user_agent: header_str(&headers, "user-agent"),
        referrer: headers.get("referer").and_then(|v| v.to_str().ok()).map(str::to_string),
        country: headers.get("x-geo-country").and_then(|v| v.to_str().ok()).map(str::to_string),
    };

    match handle_click(&state, ctx).await {
        Ok(ClickOutcome::Redirect(url)) => Redirect::to(&url).into_response(),
        Ok(ClickOutcome::Blocked(403)) => StatusCode::FORBIDDEN.into_response(),
        Ok(ClickOutcome::Blocked(_)) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Ok(ClickOutcome::BadRequest) => StatusCode::BAD_REQUEST.into_response(),
        Err(err) => err.into_response(),
    }
}

fn client_ip(headers: &HeaderMap, fallback: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| fallback.ip().to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn fallback() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    #[test]
    fn uses_first_hop_of_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));

        assert_eq!(client_ip(&headers, fallback()), "203.0.113.5");
    }

    #[test]
    fn falls_back_to_socket_addr_without_xff() {
        assert_eq!(client_ip(&HeaderMap::new(), fallback()), "127.0.0.1");
    }

    #[test]
    fn header_str_defaults_to_empty_when_absent() {
        assert_eq!(header_str(&HeaderMap::new(), "user-agent"), "");
    }
}
