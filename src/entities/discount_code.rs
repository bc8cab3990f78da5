use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the code was earned; both behave the same at pricing time but are
/// reported separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    #[sea_orm(string_value = "feedback")]
    Feedback,
    #[sea_orm(string_value = "coupon")]
    Coupon,
}

/// Discount code created by an approval workflow and consumed at most once
/// (transactionally with order creation) when `single_use` is set.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discount_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub discount_pct: Decimal,
    pub kind: DiscountKind,
    /// Earner of a feedback code; such codes are redeemable only by their
    /// owner. Open coupons leave this unset.
    #[sea_orm(nullable)]
    pub owner_id: Option<Uuid>,
    pub single_use: bool,
    pub used: bool,
    #[sea_orm(nullable)]
    pub used_by: Option<Uuid>,
    #[sea_orm(nullable)]
    pub used_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,
    /// Restricts the code to carts containing this product, when set.
    #[sea_orm(nullable)]
    pub product_id: Option<Uuid>,
    /// Restricts the code to carts containing items from this seller, when set.
    #[sea_orm(nullable)]
    pub seller_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
