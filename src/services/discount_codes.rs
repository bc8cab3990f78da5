use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    entities::discount_code::{self, Entity as DiscountCode},
    errors::ServiceError,
    services::pricing::{CartLineItem, CouponDiscount},
};

/// Validates and consumes feedback/coupon discount codes.
///
/// `resolve` never mutates: a code can pass resolution in two concurrent
/// checkouts, but `consume` runs a conditional update inside the order
/// transaction, so exactly one of them redeems a single-use code.
#[derive(Clone)]
pub struct DiscountCodeService {
    db: Arc<DatabaseConnection>,
}

impl DiscountCodeService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validate a code against the current cart and return the discount to
    /// apply. Every rejection is typed so callers can report it without
    /// altering totals.
    #[instrument(skip(self, items))]
    pub async fn resolve(
        &self,
        code: &str,
        user_id: Uuid,
        items: &[CartLineItem],
    ) -> Result<CouponDiscount, ServiceError> {
        let row = DiscountCode::find()
            .filter(discount_code::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::CouponRejected(format!("unknown code {}", code)))?;

        if row.expires_at <= Utc::now() {
            return Err(ServiceError::CouponRejected(format!(
                "code {} expired",
                code
            )));
        }

        if row.single_use && row.used {
            return Err(ServiceError::CouponRejected(format!(
                "code {} already used",
                code
            )));
        }

        if let Some(owner_id) = row.owner_id {
            if owner_id != user_id {
                return Err(ServiceError::CouponRejected(format!(
                    "code {} belongs to another account",
                    code
                )));
            }
        }

        if let Some(product_id) = row.product_id {
            if !items.iter().any(|i| i.product_id == product_id) {
                return Err(ServiceError::CouponRejected(format!(
                    "code {} does not apply to this cart",
                    code
                )));
            }
        }

        if let Some(seller_id) = row.seller_id {
            if !items.iter().any(|i| i.seller_id == seller_id) {
                return Err(ServiceError::CouponRejected(format!(
                    "code {} does not apply to this cart",
                    code
                )));
            }
        }

        Ok(CouponDiscount {
            code: row.code,
            pct: row.discount_pct,
        })
    }

    /// Mark a code as redeemed, transactionally with order creation.
    ///
    /// For single-use codes the update is guarded on `used = false` and the
    /// affected-row count decides the winner; the loser's transaction rolls
    /// back with the already-used rejection.
    pub async fn consume<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let row = DiscountCode::find()
            .filter(discount_code::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::CouponRejected(format!("unknown code {}", code)))?;

        let usage = discount_code::ActiveModel {
            used: Set(true),
            used_by: Set(Some(user_id)),
            used_at: Set(Some(Utc::now())),
            order_id: Set(Some(order_id)),
            ..Default::default()
        };

        if row.single_use {
            let result = DiscountCode::update_many()
                .set(usage)
                .filter(discount_code::Column::Code.eq(code))
                .filter(discount_code::Column::Used.eq(false))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                warn!(code, %user_id, "single-use code lost the redemption race");
                return Err(ServiceError::CouponRejected(format!(
                    "code {} already used",
                    code
                )));
            }
        } else {
            DiscountCode::update_many()
                .set(usage)
                .filter(discount_code::Column::Code.eq(code))
                .exec(conn)
                .await?;
        }

        Ok(())
    }
}
