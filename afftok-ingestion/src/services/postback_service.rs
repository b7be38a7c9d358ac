use afftok_shared::errors::{AppError, AppResult};
use diesel::prelude::*;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::models::{Conversion, NewConversion, Offer, UserOffer};
use crate::schema::{conversions, offers, promoters, user_offers};
use crate::AppState;

pub struct PostbackRequest {
    pub api_key: Option<String>,
    pub ip: String,
    pub user_offer_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub sub_id: Option<String>,
    pub click_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub amount: bigdecimal::BigDecimal,
    pub commission: bigdecimal::BigDecimal,
    pub currency: String,
    pub status: String,
    pub country: Option<String>,
    pub raw: serde_json::Value,
}

pub struct PostbackResult {
    pub conversion: Conversion,
    pub duplicate: bool,
}

pub enum PostbackOutcome {
    Recorded(PostbackResult),
    RateLimited,
    Unresolved,
    GeoBlocked,
}

pub async fn handle_postback(state: &Arc<AppState>, req: PostbackRequest) -> AppResult<PostbackOutcome> {
    let rate_key = match &req.api_key {
        Some(key) => afftok_security::RateLimitKey::ApiKey(key.clone()),
        None => afftok_security::RateLimitKey::Ip(req.ip.clone()),
    };
    let decision = state.rate_limiter.check(&rate_key).await.map_err(|e| AppError::internal(e.to_string()))?;
    if !decision.allowed {
        return Ok(PostbackOutcome::RateLimited);
    }

    let Some(user_offer) = resolve_user_offer_for_postback(state, &req).await? else {
        return Ok(PostbackOutcome::Unresolved);
    };

    let external_id = req
        .external_id
        .clone()
        .unwrap_or_else(|| generate_external_id(&user_offer.id));

    if let Some(existing) = find_conversion_by_external_id(state, &external_id).await? {
        return Ok(PostbackOutcome::Recorded(PostbackResult { conversion: existing, duplicate: true }));
    }

    let offer = load_offer(state, user_offer.offer_id).await?;

    if state.config.geo_enforce_on_postback {
        if let Some(country) = req.country.as_deref() {
            let decision = state.geo_engine.effective_rule(offer.id, Some(offer.advertiser_id), country).await;
            if !decision.allowed {
                return Ok(PostbackOutcome::GeoBlocked);
            }
        }
    }

    let conversion = record_conversion_transaction(state, &user_offer, &req, &external_id).await?;

    best_effort_post_commit(state, &user_offer, &offer, &conversion).await;

    Ok(PostbackOutcome::Recorded(PostbackResult { conversion, duplicate: false }))
}

/// Step 2: first of explicit `user_offer_id`, `tracking_code` (via the link
/// service, so it also accepts the legacy `offer:promoter` form), or `sub_id`
/// (treated as an already-issued tracking code).
async fn resolve_user_offer_for_postback(state: &Arc<AppState>, req: &PostbackRequest) -> AppResult<Option<UserOffer>> {
    if let Some(id) = req.user_offer_id {
        let db = state.db.clone();
        return tokio::task::spawn_blocking(move || -> AppResult<Option<UserOffer>> {
            let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
            Ok(user_offers::table.find(id).first::<UserOffer>(&mut conn).optional()?)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    }

    if let Some(code) = req.tracking_code.clone().or_else(|| req.sub_id.clone()) {
        return crate::services::click_service::resolve_user_offer(state, &code).await;
    }

    Ok(None)
}

fn generate_external_id(user_offer_id: &Uuid) -> String {
    let short = user_offer_id.simple().to_string();
    let short = &short[..8.min(short.len())];
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("auto_{short}_{nanos}")
}

async fn find_conversion_by_external_id(state: &Arc<AppState>, external_id: &str) -> AppResult<Option<Conversion>> {
    let db = state.db.clone();
    let external_id = external_id.to_string();
    tokio::task::spawn_blocking(move || -> AppResult<Option<Conversion>> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        Ok(conversions::table
            .filter(conversions::external_id.eq(&external_id))
            .first::<Conversion>(&mut conn)
            .optional()?)
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

async fn load_offer(state: &Arc<AppState>, offer_id: Uuid) -> AppResult<Offer> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || -> AppResult<Offer> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        Ok(offers::table.find(offer_id).first::<Offer>(&mut conn)?)
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

/// Step 4: insert Conversion, bump counters, apply the earnings delta only
/// when the incoming status is already `approved` — a `pending` postback
/// never touches `earnings`/`total_earnings` until an operator approves it.
async fn record_conversion_transaction(
    state: &Arc<AppState>,
    user_offer: &UserOffer,
    req: &PostbackRequest,
    external_id: &str,
) -> AppResult<Conversion> {
    let db = state.db.clone();
    let user_offer_id = user_offer.id;
    let offer_id = user_offer.offer_id;
    let promoter_id = user_offer.promoter_id;
    let approved = req.status == "approved";
    let commission = req.commission.clone();
    let new_conversion = NewConversion {
        user_offer_id,
        click_id: req.click_id,
        external_id: external_id.to_string(),
        amount: req.amount.clone(),
        commission: req.commission.clone(),
        currency: req.currency.clone(),
        status: req.status.clone(),
        raw_postback: req.raw.clone(),
    };

    tokio::task::spawn_blocking(move || -> AppResult<Conversion> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        conn.transaction(|conn| -> diesel::QueryResult<Conversion> {
            let conversion: Conversion =
                diesel::insert_into(conversions::table).values(&new_conversion).get_result(conn)?;

            diesel::update(user_offers::table.find(user_offer_id))
                .set((
                    user_offers::total_conversions.eq(user_offers::total_conversions + 1),
                    user_offers::updated_at.eq(chrono::Utc::now()),
                ))
                .execute(conn)?;

            diesel::update(offers::table.find(offer_id))
                .set(offers::total_conversions.eq(offers::total_conversions + 1))
                .execute(conn)?;

            diesel::update(promoters::table.find(promoter_id))
                .set(promoters::total_conversions.eq(promoters::total_conversions + 1))
                .execute(conn)?;

            if approved {
                diesel::update(user_offers::table.find(user_offer_id))
                    .set(user_offers::earnings.eq(user_offers::earnings + &commission))
                    .execute(conn)?;
                diesel::update(promoters::table.find(promoter_id))
                    .set(promoters::total_earnings.eq(promoters::total_earnings + &commission))
                    .execute(conn)?;
            }

            Ok(conversion)
        })
        .map_err(AppError::from)
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

async fn best_effort_post_commit(state: &Arc<AppState>, user_offer: &UserOffer, offer: &Offer, conversion: &Conversion) {
    let payload = serde_json::json!({
        "conversion_id": conversion.id,
        "user_offer_id": user_offer.id,
        "click_id": conversion.click_id,
        "external_id": conversion.external_id,
        "amount": conversion.amount.to_string(),
        "commission": conversion.commission.to_string(),
        "currency": conversion.currency,
        "status": conversion.status,
    });

    match state.wal.append("conversion", payload.clone()).await {
        Ok(_) => {
            let fields = [("event_type", "conversion"), ("payload", &payload.to_string())];
            if let Err(err) = state
                .redis
                .xadd(afftok_shared::types::event::stream_keys::STREAM_CONVERSIONS, &fields)
                .await
            {
                tracing::warn!(error = %err, "stream publish failed after wal append, spilling to failover");
                let _ = state.failover.enqueue("conversion", payload);
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "wal append failed after db commit, spilling to failover");
            let _ = state.failover.enqueue("conversion", payload);
        }
    }

    let _ = state
        .webhook_worker
        .trigger(
            afftok_webhooks::TriggerType::Conversion,
            Some(offer.id),
            Some(offer.advertiser_id),
            serde_json::json!({ "conversion": conversion }),
        )
        .await;
}

/// Admin-only: `pending` → `approved`, applying the earnings delta that a
/// postback carrying `status=approved` directly would have applied inline.
pub async fn approve(state: &Arc<AppState>, conversion_id: Uuid) -> AppResult<Conversion> {
    transition(state, conversion_id, "approved", None).await
}

/// Admin-only: `pending` → `rejected`. No earnings delta is applied.
pub async fn reject(state: &Arc<AppState>, conversion_id: Uuid, reason: String) -> AppResult<Conversion> {
    transition(state, conversion_id, "rejected", Some(reason)).await
}

async fn transition(state: &Arc<AppState>, conversion_id: Uuid, new_status: &str, reason: Option<String>) -> AppResult<Conversion> {
    let db = state.db.clone();
    let new_status = new_status.to_string();
    tokio::task::spawn_blocking(move || -> AppResult<Conversion> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        conn.transaction(|conn| -> diesel::QueryResult<Conversion> {
            let current: Conversion = conversions::table.find(conversion_id).first(conn)?;
            if current.status != "pending" {
                return Err(diesel::result::Error::RollbackTransaction);
            }

            let mut raw = current.raw_postback.clone();
            if let (Some(reason), Some(obj)) = (&reason, raw.as_object_mut()) {
                obj.insert("rejection_reason".to_string(), serde_json::Value::String(reason.clone()));
            }

            let updated: Conversion = diesel::update(conversions::table.find(conversion_id))
                .set((
                    conversions::status.eq(&new_status),
                    conversions::raw_postback.eq(raw),
                    conversions::updated_at.eq(chrono::Utc::now()),
                ))
                .get_result(conn)?;

            if new_status == "approved" {
                diesel::update(user_offers::table.find(updated.user_offer_id))
                    .set(user_offers::earnings.eq(user_offers::earnings + &updated.commission))
                    .execute(conn)?;

                let user_offer: UserOffer = user_offers::table.find(updated.user_offer_id).first(conn)?;
                diesel::update(promoters::table.find(user_offer.promoter_id))
                    .set(promoters::total_earnings.eq(promoters::total_earnings + &updated.commission))
                    .execute(conn)?;
            }

            Ok(updated)
        })
        .map_err(|e| match e {
            diesel::result::Error::RollbackTransaction => {
                AppError::bad_request("conversion is not in pending status")
            }
            other => AppError::from(other),
        })
    })
    .await
    .map_err(|e| AppError::internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_external_id_carries_a_prefix_of_the_user_offer_id() {
        let user_offer_id = Uuid::new_v4();

        let id = generate_external_id(&user_offer_id);

        assert!(id.starts_with("auto_"));
        assert!(id.contains(&user_offer_id.simple().to_string()[..8]));
    }

    #[test]
    fn generated_external_ids_are_unique_across_calls() {
        let user_offer_id = Uuid::new_v4();

        let a = generate_external_id(&user_offer_id);
        let b = generate_external_id(&user_offer_id);

        assert_ne!(a, b);
    }
}
