//! Discount code resolution: every rejection is typed, and rejected codes
//! never alter pricing.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use common::{line_item, TestHarness};
use marketplace_checkout_api::{entities::discount_code, errors::ServiceError};

struct CodeSeed {
    code: &'static str,
    owner_id: Option<Uuid>,
    product_id: Option<Uuid>,
    seller_id: Option<Uuid>,
    expired: bool,
}

async fn seed(harness: &TestHarness, seed: CodeSeed) {
    let expires_at = if seed.expired {
        Utc::now() - ChronoDuration::hours(1)
    } else {
        Utc::now() + ChronoDuration::days(1)
    };

    discount_code::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(seed.code.to_string()),
        discount_pct: Set(dec!(10)),
        kind: Set(if seed.owner_id.is_some() {
            discount_code::DiscountKind::Feedback
        } else {
            discount_code::DiscountKind::Coupon
        }),
        owner_id: Set(seed.owner_id),
        single_use: Set(true),
        used: Set(false),
        used_by: Set(None),
        used_at: Set(None),
        order_id: Set(None),
        product_id: Set(seed.product_id),
        seller_id: Set(seed.seller_id),
        expires_at: Set(expires_at),
        created_at: Set(Utc::now()),
    }
    .insert(&*harness.db)
    .await
    .expect("seed code");
}

#[tokio::test]
async fn unknown_code_is_rejected() {
    let harness = TestHarness::new().await;
    let items = vec![line_item(1, dec!(10.00), Uuid::new_v4())];

    let err = harness
        .services
        .checkout
        .create_intent(
            Uuid::new_v4(),
            marketplace_checkout_api::services::checkout::CheckoutSource::FromCart(items),
            serde_json::json!({}),
            serde_json::json!({}),
            None,
            Some("NOSUCHCODE".to_string()),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::CouponRejected(_));
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let harness = TestHarness::new().await;
    seed(
        &harness,
        CodeSeed {
            code: "OLD10",
            owner_id: None,
            product_id: None,
            seller_id: None,
            expired: true,
        },
    )
    .await;

    let items = vec![line_item(1, dec!(10.00), Uuid::new_v4())];
    let err = harness
        .services
        .checkout
        .create_intent(
            Uuid::new_v4(),
            marketplace_checkout_api::services::checkout::CheckoutSource::FromCart(items),
            serde_json::json!({}),
            serde_json::json!({}),
            None,
            Some("OLD10".to_string()),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::CouponRejected(_));
}

#[tokio::test]
async fn feedback_code_is_owner_bound() {
    let harness = TestHarness::new().await;
    let owner = Uuid::new_v4();
    seed(
        &harness,
        CodeSeed {
            code: "FEEDBACK10",
            owner_id: Some(owner),
            product_id: None,
            seller_id: None,
            expired: false,
        },
    )
    .await;

    let items = vec![line_item(1, dec!(10.00), Uuid::new_v4())];

    // A stranger cannot redeem the earner's code.
    let err = harness
        .services
        .discount_codes
        .resolve("FEEDBACK10", Uuid::new_v4(), &items)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CouponRejected(_));

    // The owner can.
    let coupon = harness
        .services
        .discount_codes
        .resolve("FEEDBACK10", owner, &items)
        .await
        .unwrap();
    assert_eq!(coupon.pct, dec!(10));
}

#[tokio::test]
async fn product_scoped_code_requires_matching_item() {
    let harness = TestHarness::new().await;
    let product = Uuid::new_v4();
    seed(
        &harness,
        CodeSeed {
            code: "PRODUCT10",
            owner_id: None,
            product_id: Some(product),
            seller_id: None,
            expired: false,
        },
    )
    .await;

    let unrelated = vec![line_item(1, dec!(10.00), Uuid::new_v4())];
    let err = harness
        .services
        .discount_codes
        .resolve("PRODUCT10", Uuid::new_v4(), &unrelated)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CouponRejected(_));

    let mut matching = line_item(1, dec!(10.00), Uuid::new_v4());
    matching.product_id = product;
    let coupon = harness
        .services
        .discount_codes
        .resolve("PRODUCT10", Uuid::new_v4(), &[matching])
        .await
        .unwrap();
    assert_eq!(coupon.code, "PRODUCT10");
}
