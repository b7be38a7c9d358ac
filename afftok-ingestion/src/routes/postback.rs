use afftok_shared::types::ApiResponse;
use afftok_shared::AuthPrincipal;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::services::postback_service::{handle_postback, PostbackOutcome, PostbackRequest};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PostbackFields {
    pub user_offer_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub sub_id: Option<String>,
    pub click_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub amount: Option<String>,
    pub commission: Option<String>,
    pub currency: Option<String>,
    pub status: Option<String>,
}

/// `POST /api/postback` — component E. Accepts JSON, url-encoded form, or
/// query-string parameters, whichever the advertiser's integration sends;
/// authenticates via either `X-Api-Key` or a bearer JWT.
pub async fn receive_postback(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PostbackFields>,
    principal: Option<AuthPrincipal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = parse_body(&headers, &body).unwrap_or_default();
    let fields = merge(query, parsed);

    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    if api_key.is_none() && principal.is_none() {
        return (StatusCode::UNAUTHORIZED, Json(ApiResponse::ok(serde_json::json!({"error": "missing credentials"}))))
            .into_response();
    }

    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}));

    let Some(amount) = fields.amount.as_deref().and_then(|s| s.parse::<bigdecimal::BigDecimal>().ok()) else {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::ok(serde_json::json!({"error": "missing or invalid amount"}))))
            .into_response();
    };
    let commission = fields
        .commission
        .as_deref()
        .and_then(|s| s.parse::<bigdecimal::BigDecimal>().ok())
        .unwrap_or_else(|| amount.clone());

    let req = PostbackRequest {
        api_key,
        ip: headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).map(str::to_string).unwrap_or_else(|| addr.ip().to_string()),
        user_offer_id: fields.user_offer_id,
        tracking_code: fields.tracking_code,
        sub_id: fields.sub_id,
        click_id: fields.click_id,
        external_id: fields.external_id,
        amount,
        commission,
        currency: fields.currency.unwrap_or_else(|| "USD".to_string()),
        status: fields.status.unwrap_or_else(|| "pending".to_string()),
        country: headers.get("x-geo-country").and_then(|v| v.to_str().ok()).map(str::to_string),
        raw,
    };

    match handle_postback(&state, req).await {
        Ok(PostbackOutcome::Recorded(result)) => Json(ApiResponse::ok(serde_json::json!({
            "conversion_id": result.conversion.id,
            "duplicate": result.duplicate,
        })))
        .into_response(),
        Ok(PostbackOutcome::RateLimited) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Ok(PostbackOutcome::Unresolved) => StatusCode::NOT_FOUND.into_response(),
        Ok(PostbackOutcome::GeoBlocked) => StatusCode::FORBIDDEN.into_response(),
        Err(err) => err.into_response(),
    }
}

fn parse_body(headers: &HeaderMap, body: &Bytes) -> Option<PostbackFields> {
    if body.is_empty() {
        return None;
    }
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or_default();
    if content_type.contains("application/json") {
        serde_json::from_slice(body).ok()
    } else {
        serde_urlencoded::from_bytes(body).ok()
    }
}

fn merge(query: PostbackFields, body: PostbackFields) -> PostbackFields {
    PostbackFields {
        user_offer_id: body.user_offer_id.or(query.user_offer_id),
        tracking_code: body.tracking_code.or(query.tracking_code),
        sub_id: body.sub_id.or(query.sub_id),
        click_id: body.click_id.or(query.click_id),
        external_id: body.external_id.or(query.external_id),
        amount: body.amount.or(query.amount),
        commission: body.commission.or(query.commission),
        currency: body.currency.or(query.currency),
        status: body.status.or(query.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_content_type(ct: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_str(ct).unwrap());
        headers
    }

    #[test]
    fn empty_body_parses_to_none() {
        assert!(parse_body(&HeaderMap::new(), &Bytes::new()).is_none());
    }

    #[test]
    fn parses_json_body() {
        let headers = headers_with_content_type("application/json");
        let body = Bytes::from(r#"{"status":"approved","amount":"10.50"}"#);

        let parsed = parse_body(&headers, &body).expect("should parse");

        assert_eq!(parsed.status.as_deref(), Some("approved"));
        assert_eq!(parsed.amount.as_deref(), Some("10.50"));
    }

    #[test]
    fn parses_form_encoded_body_by_default() {
        let headers = headers_with_content_type("application/x-www-form-urlencoded");
        let body = Bytes::from("status=approved&amount=10.50&sub_id=abc");

        let parsed = parse_body(&headers, &body).expect("should parse");

        assert_eq!(parsed.sub_id.as_deref(), Some("abc"));
    }

    #[test]
    fn body_fields_take_precedence_over_query_fields() {
        let query = PostbackFields { status: Some("pending".into()), amount: Some("1".into()), ..Default::default() };
        let body = PostbackFields { status: Some("approved".into()), ..Default::default() };

        let merged = merge(query, body);

        assert_eq!(merged.status.as_deref(), Some("approved"));
        assert_eq!(merged.amount.as_deref(), Some("1"));
    }
}
