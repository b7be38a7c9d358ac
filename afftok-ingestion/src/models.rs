use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{clicks, conversions, offers, user_offers};

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = offers)]
pub struct Offer {
    pub id: Uuid,
    pub advertiser_id: Uuid,
    pub name: String,
    pub destination_url: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = user_offers)]
pub struct UserOffer {
    pub id: Uuid,
    pub promoter_id: Uuid,
    pub offer_id: Uuid,
    pub tracking_code: String,
    pub affiliate_url: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub earnings: bigdecimal::BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_offers)]
pub struct NewUserOffer {
    pub promoter_id: Uuid,
    pub offer_id: Uuid,
    pub tracking_code: String,
    pub affiliate_url: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = clicks)]
pub struct Click {
    pub id: Uuid,
    pub user_offer_id: Uuid,
    pub ip: String,
    pub user_agent: String,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub referrer: Option<String>,
    pub fingerprint: String,
    pub clicked_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = clicks)]
pub struct NewClick {
    pub user_offer_id: Uuid,
    pub ip: String,
    pub user_agent: String,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub referrer: Option<String>,
    pub fingerprint: String,
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = conversions)]
pub struct Conversion {
    pub id: Uuid,
    pub user_offer_id: Uuid,
    pub click_id: Option<Uuid>,
    pub external_id: String,
    pub amount: bigdecimal::BigDecimal,
    pub commission: bigdecimal::BigDecimal,
    pub currency: String,
    pub status: String,
    pub raw_postback: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversions)]
pub struct NewConversion {
    pub user_offer_id: Uuid,
    pub click_id: Option<Uuid>,
    pub external_id: String,
    pub amount: bigdecimal::BigDecimal,
    pub commission: bigdecimal::BigDecimal,
    pub currency: String,
    pub status: String,
    pub raw_postback: serde_json::Value,
}
