use afftok_shared::errors::{AppError, AppResult};
use afftok_shared::observability::LogEvent;
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Click, NewClick, NewUserOffer, Offer, UserOffer};
use crate::schema::{clicks, offers, promoters, user_offers};
use crate::AppState;

pub struct ClickRequestContext {
    pub raw_code: String,
    pub ip: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
}

pub enum ClickOutcome {
    /// Normal redirect; the click was recorded (or deliberately not, per
    /// policy — geo-block / duplicate / invalid-but-recoverable).
    Redirect(String),
    Blocked(u16),
    BadRequest,
}

pub async fn handle_click(state: &Arc<AppState>, ctx: ClickRequestContext) -> AppResult<ClickOutcome> {
    let validated = state.link_signer.validate(&ctx.raw_code).await;

    let (tracking_code, legacy) = match validated {
        Ok(v) => (v.code, v.legacy),
        Err(failure) => {
            push_fraud_event(state, "invalid_link", failure.indicator(), &ctx, None).await;
            return match resolve_destination_best_effort(state, &ctx.raw_code).await {
                Some(url) => Ok(ClickOutcome::Redirect(url)),
                None => Ok(ClickOutcome::BadRequest),
            };
        }
    };
    if legacy {
        push_fraud_event(state, "legacy_code", "legacy_code", &ctx, None).await;
    }

    let bot_verdict = afftok_security::detect_bot(&ctx.user_agent, None);
    if bot_verdict.hard_block() {
        push_fraud_event(state, "bot_block", &bot_verdict.reason, &ctx, Some(bot_verdict.risk_score)).await;
        return Ok(ClickOutcome::Blocked(403));
    }
    if bot_verdict.risk_score > 50 {
        let _ = state.redis.incr(&format!("suspicious_ip:{}", ctx.ip)).await;
    }

    let rate_decision = state
        .rate_limiter
        .check(&afftok_security::RateLimitKey::Ip(ctx.ip.clone()))
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    if !rate_decision.allowed {
        return Ok(ClickOutcome::Blocked(429));
    }

    let user_offer = resolve_user_offer(state, &tracking_code).await?;
    let Some(user_offer) = user_offer else {
        return match resolve_destination_best_effort(state, &tracking_code).await {
            Some(url) => Ok(ClickOutcome::Redirect(url)),
            None => Ok(ClickOutcome::BadRequest),
        };
    };

    let uo_rate_decision = state
        .rate_limiter
        .check(&afftok_security::RateLimitKey::IpUserOffer(ctx.ip.clone(), user_offer.id.to_string()))
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    if !uo_rate_decision.allowed {
        return Ok(ClickOutcome::Blocked(429));
    }

    let offer = load_offer(state, user_offer.offer_id).await?;

    let geo_decision = state
        .geo_engine
        .effective_rule(offer.id, Some(offer.advertiser_id), ctx.country.as_deref().unwrap_or(""))
        .await;
    if !geo_decision.allowed {
        push_fraud_event(state, "geo_block", geo_decision.reason.indicator(), &ctx, None).await;
        return Ok(ClickOutcome::Redirect(offer.destination_url));
    }

    let fingerprint = afftok_security::fingerprint_click(&user_offer.id.to_string(), &ctx.ip, &ctx.user_agent);
    let gate = afftok_security::FingerprintGate::new(state.redis.clone());
    let is_duplicate = gate.check_and_set(&fingerprint).await.map_err(|e| AppError::internal(e.to_string()))?;
    if is_duplicate {
        return Ok(ClickOutcome::Redirect(offer.destination_url));
    }

    let click = record_click_transaction(state, &user_offer, &offer, &ctx, &fingerprint).await?;

    best_effort_post_commit(state, &user_offer, &click).await;

    Ok(ClickOutcome::Redirect(offer.destination_url))
}

/// Resolves a tracking code to its `UserOffer`. Signed links always carry an
/// opaque code that matches `user_offers.tracking_code` directly. The legacy
/// format (pre-dating signed links) instead encodes `<offer_id>:<promoter_id>`
/// in the raw code; for those we look up the pairing or create a fresh
/// `UserOffer` with a newly signed affiliate link on first sight.
pub(crate) async fn resolve_user_offer(state: &Arc<AppState>, tracking_code: &str) -> AppResult<Option<UserOffer>> {
    let db = state.db.clone();
    let code = tracking_code.to_string();
    let direct = {
        let db = db.clone();
        let code = code.clone();
        tokio::task::spawn_blocking(move || -> AppResult<Option<UserOffer>> {
            let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
            let found = user_offers::table
                .filter(user_offers::tracking_code.eq(&code))
                .first::<UserOffer>(&mut conn)
                .optional()?;
            Ok(found)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
    }?;
    if direct.is_some() {
        return Ok(direct);
    }

    let Some((offer_id, promoter_id)) = parse_legacy_code(&code) else {
        return Ok(None);
    };

    let new_tracking_code = format!("legacy_{}", Uuid::new_v4().simple());
    let affiliate_url = state.link_signer.sign(&new_tracking_code).await;

    tokio::task::spawn_blocking(move || -> AppResult<Option<UserOffer>> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        let existing = user_offers::table
            .filter(user_offers::offer_id.eq(offer_id))
            .filter(user_offers::promoter_id.eq(promoter_id))
            .first::<UserOffer>(&mut conn)
            .optional()?;
        if existing.is_some() {
            return Ok(existing);
        }

        let new_user_offer = NewUserOffer {
            promoter_id,
            offer_id,
            tracking_code: new_tracking_code,
            affiliate_url,
        };
        let created: UserOffer = diesel::insert_into(user_offers::table)
            .values(&new_user_offer)
            .get_result(&mut conn)?;
        Ok(Some(created))
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

/// Legacy codes are `<offer_id>:<promoter_id>`, both UUIDs.
fn parse_legacy_code(code: &str) -> Option<(Uuid, Uuid)> {
    let (offer_part, promoter_part) = code.split_once(':')?;
    let offer_id = Uuid::parse_str(offer_part).ok()?;
    let promoter_id = Uuid::parse_str(promoter_part).ok()?;
    Some((offer_id, promoter_id))
}

async fn load_offer(state: &Arc<AppState>, offer_id: Uuid) -> AppResult<Offer> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || -> AppResult<Offer> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        let offer = offers::table.find(offer_id).first::<Offer>(&mut conn)?;
        Ok(offer)
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

/// Step 6: insert Click, bump `user_offer`/`offer`/`promoter` counters,
/// all inside one transaction.
async fn record_click_transaction(
    state: &Arc<AppState>,
    user_offer: &UserOffer,
    offer: &Offer,
    ctx: &ClickRequestContext,
    fingerprint: &str,
) -> AppResult<Click> {
    let db = state.db.clone();
    let user_offer_id = user_offer.id;
    let offer_id = offer.id;
    let promoter_id = user_offer.promoter_id;
    let new_click = NewClick {
        user_offer_id,
        ip: ctx.ip.clone(),
        user_agent: ctx.user_agent.clone(),
        device: None,
        browser: None,
        os: None,
        country: ctx.country.clone(),
        referrer: ctx.referrer.clone(),
        fingerprint: fingerprint.to_string(),
    };

    tokio::task::spawn_blocking(move || -> AppResult<Click> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        conn.transaction(|conn| -> diesel::QueryResult<Click> {
            let click: Click = diesel::insert_into(clicks::table).values(&new_click).get_result(conn)?;

            diesel::update(user_offers::table.find(user_offer_id))
                .set((
                    user_offers::total_clicks.eq(user_offers::total_clicks + 1),
                    user_offers::updated_at.eq(chrono::Utc::now()),
                ))
                .execute(conn)?;

            diesel::update(offers::table.find(offer_id))
                .set(offers::total_clicks.eq(offers::total_clicks + 1))
                .execute(conn)?;

            diesel::update(promoters::table.find(promoter_id))
                .set(promoters::total_clicks.eq(promoters::total_clicks + 1))
                .execute(conn)?;

            Ok(click)
        })
        .map_err(AppError::from)
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

/// Step 7: best-effort, outside the transaction. Failures here are logged
/// and the click is handed to the failover queue rather than dropped.
async fn best_effort_post_commit(state: &Arc<AppState>, user_offer: &UserOffer, click: &Click) {
    let uo = user_offer.id.to_string();
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let hour = chrono::Utc::now().format("%Y-%m-%d:%H").to_string();

    let _ = state.redis.incr(&format!("clicks:total:{uo}")).await;
    if let Ok(n) = state.redis.incr(&format!("clicks:daily:{uo}:{today}")).await {
        if n == 1 {
            let _ = state.redis.expire(&format!("clicks:daily:{uo}:{today}"), 48 * 3600).await;
        }
    }
    if let Ok(n) = state.redis.incr(&format!("clicks:hourly:{uo}:{hour}")).await {
        if n == 1 {
            let _ = state.redis.expire(&format!("clicks:hourly:{uo}:{hour}"), 2 * 3600).await;
        }
    }

    let payload = serde_json::json!({
        "click_id": click.id,
        "user_offer_id": user_offer.id,
        "ip": click.ip,
        "country": click.country,
        "fingerprint": click.fingerprint,
    });

    match state.wal.append("click", payload.clone()).await {
        Ok(_) => {
            let fields = [("event_type", "click"), ("payload", &payload.to_string())];
            if let Err(err) = state.redis.xadd(afftok_shared::types::event::stream_keys::STREAM_CLICKS, &fields).await {
                tracing::warn!(error = %err, "stream publish failed after wal append, spilling to failover");
                let _ = state.failover.enqueue("click", payload);
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "wal append failed after db commit, spilling to failover");
            let _ = state.failover.enqueue("click", payload);
        }
    }
}

async fn resolve_destination_best_effort(state: &Arc<AppState>, code: &str) -> Option<String> {
    let db = state.db.clone();
    let code = code.to_string();
    let result = tokio::task::spawn_blocking(move || -> Option<String> {
        let mut conn = db.get().ok()?;
        let user_offer: UserOffer = user_offers::table.filter(user_offers::tracking_code.eq(&code)).first(&mut conn).ok()?;
        let offer: Offer = offers::table.find(user_offer.offer_id).first(&mut conn).ok()?;
        Some(offer.destination_url)
    })
    .await
    .ok()
    .flatten();

    result.or_else(|| {
        let fallback = &state.config.fallback_redirect_url;
        if fallback.is_empty() { None } else { Some(fallback.clone()) }
    })
}

async fn push_fraud_event(state: &Arc<AppState>, category: &str, indicator: &str, ctx: &ClickRequestContext, risk_score: Option<u8>) {
    let mut event = LogEvent::new("warn", category, "click ingestion flagged")
        .with_ip(&ctx.ip)
        .with_user_agent(&ctx.user_agent)
        .with_indicator(indicator);
    if let Some(score) = risk_score {
        event = event.with_risk_score(score);
    }
    afftok_shared::observability::persist_to_cache(&state.redis, &event).await;
    afftok_shared::observability::push_event(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_legacy_code() {
        let offer_id = Uuid::new_v4();
        let promoter_id = Uuid::new_v4();
        let code = format!("{offer_id}:{promoter_id}");

        let parsed = parse_legacy_code(&code);

        assert_eq!(parsed, Some((offer_id, promoter_id)));
    }

    #[test]
    fn rejects_signed_link_codes() {
        assert_eq!(parse_legacy_code("a1b2c3d4e5f6"), None);
    }

    #[test]
    fn rejects_malformed_uuids_either_side() {
        let offer_id = Uuid::new_v4();
        assert_eq!(parse_legacy_code(&format!("{offer_id}:not-a-uuid")), None);
        assert_eq!(parse_legacy_code(&format!("not-a-uuid:{offer_id}")), None);
    }

    #[test]
    fn rejects_codes_with_extra_colons() {
        let offer_id = Uuid::new_v4();
        let promoter_id = Uuid::new_v4();
        assert_eq!(parse_legacy_code(&format!("{offer_id}:{promoter_id}:extra")), None);
    }
}
