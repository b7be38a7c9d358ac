//! Geo-rule engine (component C): scoped allow/block country evaluation
//! with short-TTL caching, including negative-result caching.

use afftok_shared::clients::RedisClient;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RULE_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Offer,
    Advertiser,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Allow,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRule {
    pub scope_type: ScopeType,
    pub scope_id: Option<Uuid>,
    pub mode: RuleMode,
    pub countries: Vec<String>,
    pub priority: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    NoCountry,
    NoRule,
    OfferRule,
    AdvertiserRule,
    GlobalRule,
}

impl BlockReason {
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::NoCountry => "no_country",
            Self::NoRule => "no_rule",
            Self::OfferRule => "offer_rule",
            Self::AdvertiserRule => "advertiser_rule",
            Self::GlobalRule => "global_rule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoDecision {
    pub allowed: bool,
    pub reason: BlockReason,
}

/// Looks up the active rules for one scope. The engine is handed this
/// instead of a database handle directly, so it stays testable without a
/// live Postgres connection (§9: consume narrow interfaces).
#[async_trait::async_trait]
pub trait GeoRuleProvider: Send + Sync {
    async fn rules_for_scope(&self, scope_type: ScopeType, scope_id: Option<Uuid>) -> anyhow::Result<Vec<GeoRule>>;
}

pub struct GeoEngine<P: GeoRuleProvider> {
    redis: RedisClient,
    provider: P,
}

impl<P: GeoRuleProvider> GeoEngine<P> {
    pub fn new(redis: RedisClient, provider: P) -> Self {
        Self { redis, provider }
    }

    pub async fn effective_rule(
        &self,
        offer_id: Uuid,
        advertiser_id: Option<Uuid>,
        country: &str,
    ) -> GeoDecision {
        let country = country.trim().to_uppercase();
        if country.is_empty() {
            return GeoDecision { allowed: true, reason: BlockReason::NoCountry };
        }

        if let Some(rule) = self.lookup(ScopeType::Offer, Some(offer_id)).await {
            return evaluate(&rule, &country, BlockReason::OfferRule);
        }

        if let Some(advertiser_id) = advertiser_id {
            if let Some(rule) = self.lookup(ScopeType::Advertiser, Some(advertiser_id)).await {
                return evaluate(&rule, &country, BlockReason::AdvertiserRule);
            }
        }

        if let Some(rule) = self.lookup(ScopeType::Global, None).await {
            return evaluate(&rule, &country, BlockReason::GlobalRule);
        }

        GeoDecision { allowed: true, reason: BlockReason::NoRule }
    }

    async fn lookup(&self, scope_type: ScopeType, scope_id: Option<Uuid>) -> Option<GeoRule> {
        let cache_key = Self::cache_key(scope_type, scope_id);

        if let Ok(Some(cached)) = self.redis.get(&cache_key).await {
            return match serde_json::from_str::<Option<GeoRule>>(&cached) {
                Ok(rule) => rule,
                Err(_) => None,
            };
        }

        let rules = self
            .provider
            .rules_for_scope(scope_type, scope_id)
            .await
            .unwrap_or_default();

        let best = rules
            .into_iter()
            .filter(|r| r.active)
            .min_by_key(|r| r.priority);

        if let Ok(serialized) = serde_json::to_string(&best) {
            let _ = self.redis.set(&cache_key, &serialized, RULE_CACHE_TTL_SECS).await;
        }

        best
    }

    fn cache_key(scope_type: ScopeType, scope_id: Option<Uuid>) -> String {
        match (scope_type, scope_id) {
            (ScopeType::Global, _) => "georules:global".to_string(),
            (scope_type, Some(id)) => format!("georules:{scope_type:?}:{id}").to_lowercase(),
            (scope_type, None) => format!("georules:{scope_type:?}").to_lowercase(),
        }
    }

    /// Invalidate the cached rule for one scope; called on any CRUD change
    /// to a matching GeoRule.
    pub async fn invalidate(&self, scope_type: ScopeType, scope_id: Option<Uuid>) {
        let _ = self.redis.del(&Self::cache_key(scope_type, scope_id)).await;
    }
}

fn evaluate(rule: &GeoRule, country: &str, reason: BlockReason) -> GeoDecision {
    let in_set = rule.countries.iter().any(|c| c == country);
    let allowed = match rule.mode {
        RuleMode::Allow => in_set,
        RuleMode::Block => !in_set,
    };
    GeoDecision { allowed, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(mode: RuleMode, countries: &[&str]) -> GeoRule {
        GeoRule {
            scope_type: ScopeType::Offer,
            scope_id: Some(Uuid::nil()),
            mode,
            countries: countries.iter().map(|s| s.to_string()).collect(),
            priority: 10,
            active: true,
        }
    }

    #[test]
    fn block_mode_blocks_listed_country() {
        let r = rule(RuleMode::Block, &["RU"]);
        let decision = evaluate(&r, "RU", BlockReason::OfferRule);
        assert!(!decision.allowed);
    }

    #[test]
    fn block_mode_allows_unlisted_country() {
        let r = rule(RuleMode::Block, &["RU"]);
        let decision = evaluate(&r, "KW", BlockReason::OfferRule);
        assert!(decision.allowed);
    }

    #[test]
    fn allow_mode_allows_only_listed_country() {
        let r = rule(RuleMode::Allow, &["US", "CA"]);
        assert!(evaluate(&r, "US", BlockReason::OfferRule).allowed);
        assert!(!evaluate(&r, "FR", BlockReason::OfferRule).allowed);
    }
}
