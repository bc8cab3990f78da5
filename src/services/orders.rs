use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use tracing::info;
use uuid::Uuid;

use crate::{
    entities::{order, order_item},
    errors::ServiceError,
    services::checkout_snapshot::CheckoutData,
};

/// Creates orders from validated checkout snapshots. Invoked only by the
/// payment reconciler, inside the completion transaction.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Materialize the snapshot's items, pricing and addresses as an order
    /// with its lines, on the caller's connection (normally a transaction).
    pub async fn create_from_snapshot<C: ConnectionTrait>(
        &self,
        conn: &C,
        snapshot: &CheckoutData,
        currency: &str,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let pricing = &snapshot.pricing;

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(order_id)),
            user_id: Set(snapshot.user_id),
            status: Set("confirmed".to_string()),
            subtotal: Set(pricing.subtotal_with_discounts),
            discount_total: Set(pricing.seller_discount_total + pricing.volume_discount_total
                + pricing.coupon_discount_amount),
            coupon_code: Set(snapshot.coupon_code.clone()),
            iva_amount: Set(pricing.iva_amount),
            shipping_cost: Set(pricing.shipping_cost),
            total_amount: Set(pricing.final_total),
            currency: Set(currency.to_string()),
            shipping_address: Set(Some(snapshot.shipping_details.to_string())),
            billing_address: Set(Some(snapshot.billing_details.to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = order.insert(conn).await?;

        for priced in &pricing.items {
            let attributes = snapshot
                .items
                .iter()
                .find(|i| i.product_id == priced.product_id)
                .map(|i| i.attributes.clone())
                .filter(|a| !a.is_null());

            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(priced.product_id),
                seller_id: Set(priced.seller_id),
                quantity: Set(priced.quantity as i32),
                unit_price: Set(priced.unit_price),
                discounted_unit_price: Set(priced.discounted_unit_price),
                line_total: Set(priced.line_subtotal),
                seller_discount_amount: Set(priced.seller_savings),
                volume_discount_amount: Set(priced.volume_savings),
                attributes: Set(attributes),
                created_at: Set(now),
            }
            .insert(conn)
            .await?;
        }

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "order created from checkout snapshot"
        );
        Ok(order)
    }

    pub async fn find_by_id(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(order_id).one(&*self.db).await?)
    }
}

fn generate_order_number(order_id: Uuid) -> String {
    format!("ORD-{}", order_id.to_string()[..8].to_uppercase())
}
