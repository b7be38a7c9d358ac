use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use crate::services::click_service::{handle_click, ClickOutcome, ClickRequestContext};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct EdgeClick {
    code: String,
    ip: String,
    #[serde(default)]
    user_agent: String,
    #[serde(default)]
    referrer: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

/// `POST /api/internal/edge-click` — batch ingest of clicks collected by
/// edge nodes, replayed through the same per-click pipeline used by the
/// public redirect so bot/rate/geo/dedup policy stays identical either way.
pub async fn ingest(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();

    let decompressed;
    let raw: &[u8] = if headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
    {
        let mut out = Vec::new();
        if GzDecoder::new(&body[..]).read_to_end(&mut out).is_err() {
            return StatusCode::BAD_REQUEST.into_response();
        }
        decompressed = out;
        &decompressed
    } else {
        &body
    };

    let is_ndjson = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("ndjson"))
        .unwrap_or(true);

    let clicks = parse_batch(raw, is_ndjson);

    let mut processed = 0u32;
    let mut failed = 0u32;

    for click in clicks {
        let ctx = ClickRequestContext {
            raw_code: click.code,
            ip: click.ip,
            user_agent: click.user_agent,
            referrer: click.referrer,
            country: click.country,
        };
        match handle_click(&state, ctx).await {
            Ok(ClickOutcome::Redirect(_)) => processed += 1,
            Ok(_) | Err(_) => failed += 1,
        }
    }

    Json(serde_json::json!({
        "processed": processed,
        "failed": failed,
        "processing_ms": started.elapsed().as_millis(),
    }))
    .into_response()
}

/// Parses a raw (already-decompressed) batch body as either ndjson (one
/// `EdgeClick` per line) or a single JSON array. Malformed lines/entries are
/// dropped rather than failing the whole batch.
fn parse_batch(raw: &[u8], is_ndjson: bool) -> Vec<EdgeClick> {
    if is_ndjson {
        std::str::from_utf8(raw)
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    } else {
        serde_json::from_slice::<Vec<EdgeClick>>(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ndjson_lines_skipping_blanks_and_garbage() {
        let body = b"{\"code\":\"a\",\"ip\":\"1.1.1.1\"}\n\n{\"code\":\"b\",\"ip\":\"2.2.2.2\",\"country\":\"US\"}\nnot json\n";

        let clicks = parse_batch(body, true);

        assert_eq!(clicks.len(), 2);
        assert_eq!(clicks[0].code, "a");
        assert_eq!(clicks[1].country.as_deref(), Some("US"));
    }

    #[test]
    fn parses_json_array_batches() {
        let body = br#"[{"code":"a","ip":"1.1.1.1"},{"code":"b","ip":"2.2.2.2"}]"#;

        let clicks = parse_batch(body, false);

        assert_eq!(clicks.len(), 2);
    }

    #[test]
    fn malformed_array_body_yields_empty_batch_rather_than_panicking() {
        let clicks = parse_batch(b"not an array", false);
        assert!(clicks.is_empty());
    }

    #[test]
    fn missing_optional_fields_default_sensibly() {
        let body = b"{\"code\":\"a\",\"ip\":\"1.1.1.1\"}";

        let clicks = parse_batch(body, true);

        assert_eq!(clicks[0].user_agent, "");
        assert_eq!(clicks[0].referrer, None);
        assert_eq!(clicks[0].country, None);
    }
}
