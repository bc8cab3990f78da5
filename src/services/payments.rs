use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::payment::{self, Entity as Payment, PaymentStatus},
    errors::ServiceError,
};

/// Owns the payment-attempt state machine:
/// pending -> processing -> {completed | failed | cancelled}, with
/// completed -> refunded as a separate later arc.
///
/// Every transition is a single conditional update guarded on the allowed
/// source states; the affected-row count decides whether this caller won the
/// transition. There is exactly one code path per transition.
#[derive(Clone)]
pub struct PaymentRecordService {
    db: Arc<DatabaseConnection>,
}

impl PaymentRecordService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a new `pending` record for a caller-generated transaction id.
    #[instrument(skip(self))]
    pub async fn create_pending(
        &self,
        transaction_id: &str,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        gateway_checkout_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_id: Set(transaction_id.to_string()),
            user_id: Set(user_id),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            status: Set(PaymentStatus::Pending),
            gateway_checkout_id: Set(gateway_checkout_id),
            session_id: Set(session_id),
            order_id: Set(None),
            error_code: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let record = model.insert(&*self.db).await?;
        info!(transaction_id, %user_id, %amount, "payment record created");
        Ok(record)
    }

    /// Read-only lookup; used by the status query endpoint and the
    /// reconciler. Never creates or mutates state.
    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::TransactionId.eq(transaction_id))
            .one(&*self.db)
            .await?)
    }

    /// pending -> processing. Losing the race is fine: the record is already
    /// being handled.
    pub async fn mark_processing(&self, transaction_id: &str) -> Result<bool, ServiceError> {
        self.transition(
            &*self.db,
            transaction_id,
            &[PaymentStatus::Pending],
            payment::ActiveModel {
                status: Set(PaymentStatus::Processing),
                updated_at: Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// {pending, processing} -> completed, linking the created order. Runs on
    /// the caller's transaction so order creation and the transition commit
    /// together. Returns whether this caller won the transition.
    pub async fn complete_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_id: &str,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        self.transition(
            conn,
            transaction_id,
            &[PaymentStatus::Pending, PaymentStatus::Processing],
            payment::ActiveModel {
                status: Set(PaymentStatus::Completed),
                order_id: Set(Some(order_id)),
                error_code: Set(None),
                error_message: Set(None),
                updated_at: Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// {pending, processing} -> failed, recording the gateway error.
    pub async fn fail(
        &self,
        transaction_id: &str,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool, ServiceError> {
        self.transition(
            &*self.db,
            transaction_id,
            &[PaymentStatus::Pending, PaymentStatus::Processing],
            payment::ActiveModel {
                status: Set(PaymentStatus::Failed),
                error_code: Set(error_code),
                error_message: Set(error_message),
                updated_at: Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// {pending, processing} -> cancelled (user abandoned or admin voided).
    pub async fn cancel(&self, transaction_id: &str) -> Result<bool, ServiceError> {
        self.transition(
            &*self.db,
            transaction_id,
            &[PaymentStatus::Pending, PaymentStatus::Processing],
            payment::ActiveModel {
                status: Set(PaymentStatus::Cancelled),
                updated_at: Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// completed -> refunded. Separate arc from reconciliation.
    pub async fn refund(&self, transaction_id: &str) -> Result<bool, ServiceError> {
        self.transition(
            &*self.db,
            transaction_id,
            &[PaymentStatus::Completed],
            payment::ActiveModel {
                status: Set(PaymentStatus::Refunded),
                updated_at: Set(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_id: &str,
        allowed_sources: &[PaymentStatus],
        change: payment::ActiveModel,
    ) -> Result<bool, ServiceError> {
        let result = Payment::update_many()
            .set(change)
            .filter(payment::Column::TransactionId.eq(transaction_id))
            .filter(payment::Column::Status.is_in(allowed_sources.iter().copied()))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
