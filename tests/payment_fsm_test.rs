//! Payment record lifecycle: conditional transitions, terminal states, and
//! the refund arc.

mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestHarness;
use marketplace_checkout_api::entities::payment::PaymentStatus;

async fn pending_payment(harness: &TestHarness, transaction_id: &str) {
    harness
        .services
        .payments
        .create_pending(
            transaction_id,
            Uuid::new_v4(),
            dec!(50.00),
            "USD",
            Some("chk-1".to_string()),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn pending_moves_through_processing_to_completed() {
    let harness = TestHarness::new().await;
    pending_payment(&harness, "txn-fsm-1").await;

    assert!(harness
        .services
        .payments
        .mark_processing("txn-fsm-1")
        .await
        .unwrap());

    let order_id = Uuid::new_v4();
    assert!(harness
        .services
        .payments
        .complete_on(&*harness.db, "txn-fsm-1", order_id)
        .await
        .unwrap());

    let record = harness
        .services
        .payments
        .find_by_transaction_id("txn-fsm-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Completed);
    assert_eq!(record.status.as_str(), "completed");
    assert_eq!(record.order_id, Some(order_id));
}

#[tokio::test]
async fn completed_records_reject_further_transitions() {
    let harness = TestHarness::new().await;
    pending_payment(&harness, "txn-fsm-2").await;

    let order_id = Uuid::new_v4();
    assert!(harness
        .services
        .payments
        .complete_on(&*harness.db, "txn-fsm-2", order_id)
        .await
        .unwrap());

    // Double transitions lose the conditional update.
    assert!(!harness
        .services
        .payments
        .complete_on(&*harness.db, "txn-fsm-2", Uuid::new_v4())
        .await
        .unwrap());
    assert!(!harness
        .services
        .payments
        .fail("txn-fsm-2", Some("800.100.152".to_string()), None)
        .await
        .unwrap());
    assert!(!harness.services.payments.cancel("txn-fsm-2").await.unwrap());

    let record = harness
        .services
        .payments
        .find_by_transaction_id("txn-fsm-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Completed);
    assert_eq!(record.order_id, Some(order_id));
}

#[tokio::test]
async fn failed_records_keep_their_error() {
    let harness = TestHarness::new().await;
    pending_payment(&harness, "txn-fsm-3").await;

    assert!(harness
        .services
        .payments
        .fail(
            "txn-fsm-3",
            Some("800.100.152".to_string()),
            Some("transaction declined".to_string()),
        )
        .await
        .unwrap());

    let record = harness
        .services
        .payments
        .find_by_transaction_id("txn-fsm-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
    assert!(record.status.is_terminal());
    assert_eq!(record.error_code.as_deref(), Some("800.100.152"));
    assert_eq!(record.error_message.as_deref(), Some("transaction declined"));
}

#[tokio::test]
async fn refund_is_reachable_only_from_completed() {
    let harness = TestHarness::new().await;
    pending_payment(&harness, "txn-fsm-4").await;

    // Not refundable while pending.
    assert!(!harness.services.payments.refund("txn-fsm-4").await.unwrap());

    assert!(harness
        .services
        .payments
        .complete_on(&*harness.db, "txn-fsm-4", Uuid::new_v4())
        .await
        .unwrap());
    assert!(harness.services.payments.refund("txn-fsm-4").await.unwrap());

    let record = harness
        .services
        .payments
        .find_by_transaction_id("txn-fsm-4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Refunded);

    // Refunded is terminal too.
    assert!(!harness.services.payments.refund("txn-fsm-4").await.unwrap());
}

#[tokio::test]
async fn status_query_has_no_side_effects() {
    let harness = TestHarness::new().await;
    pending_payment(&harness, "txn-fsm-5").await;

    for _ in 0..3 {
        let record = harness
            .services
            .payments
            .find_by_transaction_id("txn-fsm-5")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PaymentStatus::Pending);
    }
}
