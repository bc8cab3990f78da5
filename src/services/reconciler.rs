//! Payment reconciliation: turns a normalized gateway confirmation into at
//! most one order, whichever confirmation path gets there first.
//!
//! Callers may race: the synchronous redirect-return, the asynchronous
//! webhook, and manual re-verification can all invoke `reconcile` for the
//! same transaction id. A per-transaction in-process mutex serializes local
//! callers; the conditional status update is the authoritative guard, so a
//! caller that loses the completion race observes the winner's state and
//! returns its result instead of retrying the side effect.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::payment::{self, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        checkout::CheckoutService,
        checkout_snapshot::{CheckoutData, CheckoutSnapshotStore},
        discount_codes::DiscountCodeService,
        gateway::PaymentVerificationResult,
        orders::OrderService,
        payments::PaymentRecordService,
        pricing::PricingEngine,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub order_number: String,
    pub total: Decimal,
}

/// Outcome of a reconciliation call. Terminal business outcomes (declined,
/// already processed) are reported here; infrastructure trouble, missing
/// records, expired snapshots and amount discrepancies surface as
/// `ServiceError`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconcileOutcome {
    pub success: bool,
    pub order: Option<OrderSummary>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    payments: Arc<PaymentRecordService>,
    orders: Arc<OrderService>,
    discount_codes: Arc<DiscountCodeService>,
    snapshots: Arc<CheckoutSnapshotStore>,
    pricing: Arc<PricingEngine>,
    events: EventSender,
    amount_tolerance: Decimal,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl PaymentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<PaymentRecordService>,
        orders: Arc<OrderService>,
        discount_codes: Arc<DiscountCodeService>,
        snapshots: Arc<CheckoutSnapshotStore>,
        pricing: Arc<PricingEngine>,
        events: EventSender,
        amount_tolerance: Decimal,
    ) -> Self {
        Self {
            db,
            payments,
            orders,
            discount_codes,
            snapshots,
            pricing,
            events,
            amount_tolerance,
            in_flight: DashMap::new(),
        }
    }

    fn transaction_lock(&self, transaction_id: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(transaction_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reconcile a gateway confirmation against the payment record.
    ///
    /// Idempotent: re-invoking with the same transaction id after a terminal
    /// outcome returns that outcome without re-running any side effect.
    #[instrument(skip(self, verification), fields(transaction_id = %verification.transaction_id))]
    pub async fn reconcile(
        &self,
        verification: &PaymentVerificationResult,
        correlation_key: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let transaction_id = verification.transaction_id.clone();

        // Only one reconciliation in flight per transaction id at a time;
        // later callers observe the state the first one left behind.
        let lock = self.transaction_lock(&transaction_id);
        let _guard = lock.lock().await;

        let record = self
            .payments
            .find_by_transaction_id(&transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment with transaction id {}", transaction_id))
            })?;

        if record.status.is_terminal() {
            return self.terminal_outcome(&record).await;
        }

        if !verification.successful {
            let transitioned = self
                .payments
                .fail(
                    &transaction_id,
                    verification.error_code.clone(),
                    verification.error_message.clone(),
                )
                .await?;

            if !transitioned {
                // Another path settled the record first; report its state.
                let current = self.require_record(&transaction_id).await?;
                return self.terminal_outcome(&current).await;
            }

            self.events
                .send(Event::PaymentFailed {
                    transaction_id: transaction_id.clone(),
                    error_code: verification.error_code.clone(),
                })
                .await;

            return Ok(ReconcileOutcome {
                success: false,
                order: None,
                message: verification
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "payment was declined by the gateway".to_string()),
                error_code: verification.error_code.clone(),
            });
        }

        self.payments.mark_processing(&transaction_id).await?;

        let snapshot = self.resolve_snapshot(&record, correlation_key).await?;

        // Recompute the authoritative total from server data. This is the
        // primary defense against the displayed total being tampered with
        // between cart view and payment.
        let authoritative = self.recompute_total(&snapshot)?;
        let difference = (authoritative - verification.amount).abs();
        if difference > self.amount_tolerance {
            warn!(
                expected = %authoritative,
                received = %verification.amount,
                %difference,
                "verified amount disagrees with recomputed total"
            );
            return Err(ServiceError::AmountDiscrepancy {
                expected: authoritative,
                received: verification.amount,
            });
        }

        // Order creation, coupon consumption and the completed transition
        // commit together or not at all.
        let txn = self.db.begin().await?;

        let order = self
            .orders
            .create_from_snapshot(&txn, &snapshot, &record.currency)
            .await?;

        if let Some(code) = &snapshot.coupon_code {
            self.discount_codes
                .consume(&txn, code, snapshot.user_id, order.id)
                .await?;
        }

        let won = self
            .payments
            .complete_on(&txn, &transaction_id, order.id)
            .await?;

        if !won {
            txn.rollback().await?;
            let current = self.require_record(&transaction_id).await?;
            if current.status.is_terminal() {
                return self.terminal_outcome(&current).await;
            }
            error!(%transaction_id, status = ?current.status, "lost completion race to a non-terminal state");
            return Err(ServiceError::Conflict(format!(
                "payment {} is being reconciled elsewhere",
                transaction_id
            )));
        }

        txn.commit().await?;

        // The snapshot is single-purpose; clearing it is best-effort since
        // the TTL covers the crash window after commit.
        if let Err(e) = self.snapshots.delete(&snapshot.session_id).await {
            warn!(session_id = %snapshot.session_id, error = %e, "failed to delete consumed snapshot");
        }

        self.events.send(Event::OrderCreated(order.id)).await;
        self.events
            .send(Event::PaymentCompleted {
                transaction_id: transaction_id.clone(),
                order_id: order.id,
                amount: order.total_amount,
            })
            .await;
        if let Some(code) = &snapshot.coupon_code {
            self.events
                .send(Event::CouponRedeemed {
                    code: code.clone(),
                    user_id: snapshot.user_id,
                    order_id: order.id,
                })
                .await;
        }

        info!(%transaction_id, order_id = %order.id, "payment reconciled, order created");

        Ok(ReconcileOutcome {
            success: true,
            order: Some(OrderSummary {
                order_id: order.id,
                order_number: order.order_number,
                total: order.total_amount,
            }),
            message: "payment verified and order created".to_string(),
            error_code: None,
        })
    }

    async fn require_record(
        &self,
        transaction_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        self.payments
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "payment {} disappeared during reconciliation",
                    transaction_id
                ))
            })
    }

    /// Build the outcome for a record that already reached a terminal state.
    async fn terminal_outcome(
        &self,
        record: &payment::Model,
    ) -> Result<ReconcileOutcome, ServiceError> {
        match record.status {
            PaymentStatus::Completed => {
                let order_id = record.order_id.ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "completed payment {} has no linked order",
                        record.transaction_id
                    ))
                })?;
                let order = self.orders.find_by_id(order_id).await?.ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "order {} linked to payment {} not found",
                        order_id, record.transaction_id
                    ))
                })?;

                Ok(ReconcileOutcome {
                    success: true,
                    order: Some(OrderSummary {
                        order_id: order.id,
                        order_number: order.order_number,
                        total: order.total_amount,
                    }),
                    message: "payment already processed".to_string(),
                    error_code: None,
                })
            }
            PaymentStatus::Failed => Ok(ReconcileOutcome {
                success: false,
                order: None,
                message: record
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "payment previously failed".to_string()),
                error_code: record.error_code.clone(),
            }),
            PaymentStatus::Cancelled => Ok(ReconcileOutcome {
                success: false,
                order: None,
                message: "payment was cancelled".to_string(),
                error_code: Some("payment_cancelled".to_string()),
            }),
            PaymentStatus::Refunded => Ok(ReconcileOutcome {
                success: false,
                order: None,
                message: "payment was refunded".to_string(),
                error_code: Some("payment_refunded".to_string()),
            }),
            PaymentStatus::Pending | PaymentStatus::Processing => {
                Err(ServiceError::InternalError(format!(
                    "payment {} is not terminal",
                    record.transaction_id
                )))
            }
        }
    }

    /// Resolve the checkout snapshot: by correlation key, then by the
    /// session id stored on the record, then best-effort recovery through
    /// the owner's recent-session index. Missing and expired are the same
    /// distinct failure: the client must restart checkout.
    async fn resolve_snapshot(
        &self,
        record: &payment::Model,
        correlation_key: Option<&str>,
    ) -> Result<CheckoutData, ServiceError> {
        let mut keys: Vec<String> = Vec::new();
        if let Some(key) = correlation_key {
            keys.push(key.to_string());
        }
        if let Some(session_id) = &record.session_id {
            if !keys.contains(session_id) {
                keys.push(session_id.clone());
            }
        }

        for key in &keys {
            if let Some(snapshot) = self.snapshots.retrieve(key).await? {
                return Ok(snapshot);
            }
        }

        for key in self.snapshots.sessions_for_user(record.user_id).await? {
            if keys.contains(&key) {
                continue;
            }
            if let Some(snapshot) = self.snapshots.retrieve(&key).await? {
                // Recovery must not pick an unrelated concurrent checkout.
                if snapshot.pricing.final_total == record.amount {
                    warn!(
                        transaction_id = %record.transaction_id,
                        session_id = %key,
                        "recovered checkout session from user index"
                    );
                    return Ok(snapshot);
                }
            }
        }

        Err(ServiceError::CheckoutExpired(format!(
            "no valid checkout session for transaction {}",
            record.transaction_id
        )))
    }

    /// Re-run the pricing engine on the snapshot's validated items to obtain
    /// the authoritative amount.
    fn recompute_total(&self, snapshot: &CheckoutData) -> Result<Decimal, ServiceError> {
        CheckoutService::recompute_snapshot_total(&self.pricing, snapshot)
    }
}
