/// Heuristic bot-detection outcome. Callers hard-block when
/// `is_bot && confidence > 0.85`; lower-confidence signals are recorded
/// (risk_score) but don't block on their own.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BotVerdict {
    pub is_bot: bool,
    pub confidence: f64,
    pub risk_score: u8,
    pub reason: String,
}

impl BotVerdict {
    pub fn hard_block(&self) -> bool {
        self.is_bot && self.confidence > 0.85
    }
}

const KNOWN_BOT_TOKENS: &[&str] = &[
    "bot", "spider", "crawl", "slurp", "curl/", "wget/", "python-requests",
    "headlesschrome", "phantomjs", "scrapy",
];

/// Scores a click/postback request for bot-like traits using only the
/// request's user-agent and a couple of commonly-spoofed headers. There is
/// no ML model here — this mirrors the "ua heuristics" class of bot checks
/// widely used at the edge, which is the actual leverage point: it catches
/// undisguised scrapers and leaves sophisticated ones to the fraud pipeline.
pub fn detect_bot(user_agent: &str, accept_header: Option<&str>) -> BotVerdict {
    let ua_lower = user_agent.to_lowercase();

    if ua_lower.is_empty() {
        return BotVerdict {
            is_bot: true,
            confidence: 0.9,
            risk_score: 80,
            reason: "missing user agent".to_string(),
        };
    }

    for token in KNOWN_BOT_TOKENS {
        if ua_lower.contains(token) {
            return BotVerdict {
                is_bot: true,
                confidence: 0.95,
                risk_score: 90,
                reason: format!("user agent matches known bot token '{token}'"),
            };
        }
    }

    let mut risk_score: u8 = 0;
    let mut reasons = Vec::new();

    if accept_header.map(|h| h.is_empty()).unwrap_or(true) {
        risk_score += 15;
        reasons.push("missing accept header");
    }

    if ua_lower.len() < 15 {
        risk_score += 20;
        reasons.push("unusually short user agent");
    }

    let is_bot = risk_score >= 50;
    let confidence = (risk_score as f64) / 100.0;

    BotVerdict {
        is_bot,
        confidence,
        risk_score,
        reason: if reasons.is_empty() {
            "no bot signals".to_string()
        } else {
            reasons.join(", ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bot_token_hard_blocks() {
        let verdict = detect_bot("Mozilla/5.0 (compatible; Googlebot/2.1)", Some("*/*"));
        assert!(verdict.hard_block());
    }

    #[test]
    fn ordinary_browser_ua_passes() {
        let verdict = detect_bot(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            Some("text/html,application/xhtml+xml"),
        );
        assert!(!verdict.hard_block());
    }

    #[test]
    fn missing_user_agent_hard_blocks() {
        let verdict = detect_bot("", Some("*/*"));
        assert!(verdict.hard_block());
    }
}
