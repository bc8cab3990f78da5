//! Deterministic cart pricing.
//!
//! `PricingEngine` is a pure function over validated line items: the same
//! inputs always produce the same cents-accurate `PricingResult`, so both
//! checkout-intent creation and payment reconciliation can recompute totals
//! and compare them safely. All arithmetic runs on `Decimal` at full
//! precision; each reported aggregate is rounded exactly once (2 decimal
//! places, half-up), and `final_total` is derived from the rounded
//! aggregates so the closure invariant holds exactly:
//!
//! `final_total == subtotal_with_discounts - coupon_discount_amount
//!               + iva_amount + shipping_cost`

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PricingSettings;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("item {product_id} has zero quantity")]
    ZeroQuantity { product_id: Uuid },

    #[error("item {product_id} has a negative unit price")]
    NegativeUnitPrice { product_id: Uuid },

    #[error("item {product_id} has seller discount {pct}% outside 0-100")]
    SellerDiscountOutOfRange { product_id: Uuid, pct: Decimal },

    #[error("coupon percentage {pct}% outside 0-100")]
    CouponPercentageOutOfRange { pct: Decimal },

    #[error("invalid pricing configuration: {0}")]
    InvalidConfig(String),
}

/// Immutable pricing input. Quantity and discount ranges are validated at
/// the engine boundary; `attributes` never affects pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLineItem {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub seller_discount_pct: Decimal,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A discount code already validated against the store (existence, usage,
/// expiry, scope). The engine only applies the percentage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponDiscount {
    pub code: String,
    pub pct: Decimal,
}

/// Quantity-indexed volume discount tier; the highest qualifying threshold
/// wins, ties take the larger percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeTier {
    pub min_quantity: u32,
    pub percentage: Decimal,
}

/// Engine configuration, converted once at startup from `PricingSettings`.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub iva_rate: Decimal,
    pub volume_tiers: Vec<VolumeTier>,
    pub shipping_cost: Decimal,
    pub single_seller_shipping_share: Decimal,
    pub multi_seller_shipping_share: Decimal,
}

impl PricingConfig {
    pub fn from_settings(settings: &PricingSettings) -> Result<Self, PricingError> {
        let to_decimal = |value: f64, field: &str| {
            Decimal::try_from(value)
                .map_err(|e| PricingError::InvalidConfig(format!("{}: {}", field, e)))
        };

        let mut volume_tiers = settings
            .volume_tiers
            .iter()
            .map(|t| {
                Ok(VolumeTier {
                    min_quantity: t.min_quantity,
                    percentage: to_decimal(t.percentage, "volume_tiers.percentage")?,
                })
            })
            .collect::<Result<Vec<_>, PricingError>>()?;
        volume_tiers.sort();

        Ok(Self {
            iva_rate: to_decimal(settings.iva_rate, "iva_rate")?,
            volume_tiers,
            shipping_cost: to_decimal(settings.shipping_cost, "shipping_cost")?,
            single_seller_shipping_share: to_decimal(
                settings.single_seller_shipping_share,
                "single_seller_shipping_share",
            )?,
            multi_seller_shipping_share: to_decimal(
                settings.multi_seller_shipping_share,
                "multi_seller_shipping_share",
            )?,
        })
    }
}

/// Per-item pricing breakdown, reported alongside the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemPricing {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub seller_discount_pct: Decimal,
    pub volume_discount_pct: Decimal,
    pub discounted_unit_price: Decimal,
    pub line_subtotal: Decimal,
    pub seller_savings: Decimal,
    pub volume_savings: Decimal,
}

/// Informational split of the shipping cost between sellers and platform.
/// Never alters the customer-facing total; the platform share absorbs
/// per-seller rounding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingBreakdown {
    pub seller_shares: Vec<SellerShippingShare>,
    pub platform_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellerShippingShare {
    pub seller_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingResult {
    pub subtotal_original: Decimal,
    pub subtotal_with_discounts: Decimal,
    pub seller_discount_total: Decimal,
    pub volume_discount_total: Decimal,
    pub coupon_discount_amount: Decimal,
    pub coupon_discount_pct: Decimal,
    pub iva_amount: Decimal,
    pub shipping_cost: Decimal,
    pub shipping_breakdown: ShippingBreakdown,
    pub final_total: Decimal,
    pub items: Vec<ItemPricing>,
}

impl PricingResult {
    fn empty() -> Self {
        Self {
            subtotal_original: Decimal::ZERO,
            subtotal_with_discounts: Decimal::ZERO,
            seller_discount_total: Decimal::ZERO,
            volume_discount_total: Decimal::ZERO,
            coupon_discount_amount: Decimal::ZERO,
            coupon_discount_pct: Decimal::ZERO,
            iva_amount: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            shipping_breakdown: ShippingBreakdown {
                seller_shares: Vec::new(),
                platform_amount: Decimal::ZERO,
            },
            final_total: Decimal::ZERO,
            items: Vec::new(),
        }
    }
}

/// Round to currency minor units, half away from zero. Applied exactly once
/// per reported aggregate, never accumulated from rounded line items.
fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn pct_of(value: Decimal, pct: Decimal) -> Decimal {
    value * pct / HUNDRED
}

#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Highest qualifying volume tier for a quantity; ties on the threshold
    /// take the larger percentage. Quantities below every tier get 0%.
    fn volume_discount_pct(&self, quantity: u32) -> Decimal {
        self.config
            .volume_tiers
            .iter()
            .filter(|t| quantity >= t.min_quantity)
            .max_by_key(|t| (t.min_quantity, t.percentage))
            .map(|t| t.percentage)
            .unwrap_or(Decimal::ZERO)
    }

    /// Recompute the cart's totals from authoritative inputs.
    ///
    /// Pure and deterministic: no I/O, no clock, no randomness. The coupon,
    /// if present, must already be validated; rejections happen before the
    /// engine is invoked so a failed coupon never partially applies.
    pub fn compute_totals(
        &self,
        items: &[CartLineItem],
        coupon: Option<&CouponDiscount>,
    ) -> Result<PricingResult, PricingError> {
        if items.is_empty() {
            return Ok(PricingResult::empty());
        }

        if let Some(coupon) = coupon {
            if coupon.pct < Decimal::ZERO || coupon.pct > HUNDRED {
                return Err(PricingError::CouponPercentageOutOfRange { pct: coupon.pct });
            }
        }

        let mut raw_original = Decimal::ZERO;
        let mut raw_discounted = Decimal::ZERO;
        let mut raw_seller_savings = Decimal::ZERO;
        let mut raw_volume_savings = Decimal::ZERO;
        let mut item_results = Vec::with_capacity(items.len());
        let mut sellers: BTreeSet<Uuid> = BTreeSet::new();

        for item in items {
            if item.quantity == 0 {
                return Err(PricingError::ZeroQuantity {
                    product_id: item.product_id,
                });
            }
            if item.unit_price < Decimal::ZERO {
                return Err(PricingError::NegativeUnitPrice {
                    product_id: item.product_id,
                });
            }
            if item.seller_discount_pct < Decimal::ZERO || item.seller_discount_pct > HUNDRED {
                return Err(PricingError::SellerDiscountOutOfRange {
                    product_id: item.product_id,
                    pct: item.seller_discount_pct,
                });
            }

            let quantity = Decimal::from(item.quantity);
            let volume_pct = self.volume_discount_pct(item.quantity);

            let seller_discounted_unit =
                item.unit_price - pct_of(item.unit_price, item.seller_discount_pct);
            let final_unit = seller_discounted_unit - pct_of(seller_discounted_unit, volume_pct);

            let line_original = item.unit_price * quantity;
            let line_subtotal = final_unit * quantity;
            let seller_savings = (item.unit_price - seller_discounted_unit) * quantity;
            let volume_savings = (seller_discounted_unit - final_unit) * quantity;

            raw_original += line_original;
            raw_discounted += line_subtotal;
            raw_seller_savings += seller_savings;
            raw_volume_savings += volume_savings;
            sellers.insert(item.seller_id);

            item_results.push(ItemPricing {
                product_id: item.product_id,
                seller_id: item.seller_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                seller_discount_pct: item.seller_discount_pct,
                volume_discount_pct: volume_pct,
                discounted_unit_price: round_money(final_unit),
                line_subtotal: round_money(line_subtotal),
                seller_savings: round_money(seller_savings),
                volume_savings: round_money(volume_savings),
            });
        }

        let subtotal_original = round_money(raw_original);
        let subtotal_with_discounts = round_money(raw_discounted);
        let seller_discount_total = round_money(raw_seller_savings);
        let volume_discount_total = round_money(raw_volume_savings);

        let coupon_discount_pct = coupon.map(|c| c.pct).unwrap_or(Decimal::ZERO);
        // Capped so the discounted base never goes negative.
        let coupon_discount_amount =
            round_money(pct_of(subtotal_with_discounts, coupon_discount_pct))
                .min(subtotal_with_discounts);

        let taxable = subtotal_with_discounts - coupon_discount_amount;
        let iva_amount = round_money(taxable * self.config.iva_rate);
        let shipping_cost = round_money(self.config.shipping_cost);

        let shipping_breakdown = self.split_shipping(shipping_cost, &sellers);

        // Exact identity over the reported aggregates.
        let final_total = taxable + iva_amount + shipping_cost;

        Ok(PricingResult {
            subtotal_original,
            subtotal_with_discounts,
            seller_discount_total,
            volume_discount_total,
            coupon_discount_amount,
            coupon_discount_pct,
            iva_amount,
            shipping_cost,
            shipping_breakdown,
            final_total,
            items: item_results,
        })
    }

    /// Split the shipping cost between contributing sellers and the
    /// platform. A lone seller gets the majority share; with several sellers
    /// each gets the flat share and the platform keeps the remainder,
    /// floored at zero.
    fn split_shipping(&self, shipping_cost: Decimal, sellers: &BTreeSet<Uuid>) -> ShippingBreakdown {
        if sellers.is_empty() || shipping_cost == Decimal::ZERO {
            return ShippingBreakdown {
                seller_shares: Vec::new(),
                platform_amount: shipping_cost,
            };
        }

        let share_pct = if sellers.len() == 1 {
            self.config.single_seller_shipping_share
        } else {
            self.config.multi_seller_shipping_share
        };

        let per_seller = round_money(pct_of(shipping_cost, share_pct));
        let seller_shares: Vec<SellerShippingShare> = sellers
            .iter()
            .map(|&seller_id| SellerShippingShare {
                seller_id,
                amount: per_seller,
            })
            .collect();

        let credited: Decimal = seller_shares.iter().map(|s| s.amount).sum();
        let platform_amount = (shipping_cost - credited).max(Decimal::ZERO);

        ShippingBreakdown {
            seller_shares,
            platform_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> PricingEngine {
        PricingEngine::new(PricingConfig {
            iva_rate: dec!(0.15),
            volume_tiers: vec![
                VolumeTier {
                    min_quantity: 5,
                    percentage: dec!(5),
                },
                VolumeTier {
                    min_quantity: 10,
                    percentage: dec!(10),
                },
            ],
            shipping_cost: dec!(5.00),
            single_seller_shipping_share: dec!(80),
            multi_seller_shipping_share: dec!(40),
        })
    }

    fn item(qty: u32, price: Decimal, seller_pct: Decimal, seller_id: Uuid) -> CartLineItem {
        CartLineItem {
            product_id: Uuid::new_v4(),
            seller_id,
            quantity: qty,
            unit_price: price,
            seller_discount_pct: seller_pct,
            attributes: serde_json::Value::Null,
        }
    }

    #[test]
    fn tier_boundaries() {
        let engine = engine();
        assert_eq!(engine.volume_discount_pct(4), dec!(0));
        assert_eq!(engine.volume_discount_pct(5), dec!(5));
        assert_eq!(engine.volume_discount_pct(9), dec!(5));
        assert_eq!(engine.volume_discount_pct(10), dec!(10));
        assert_eq!(engine.volume_discount_pct(500), dec!(10));
    }

    #[test]
    fn tier_tie_takes_larger_discount() {
        let engine = PricingEngine::new(PricingConfig {
            iva_rate: dec!(0),
            volume_tiers: vec![
                VolumeTier {
                    min_quantity: 5,
                    percentage: dec!(3),
                },
                VolumeTier {
                    min_quantity: 5,
                    percentage: dec!(7),
                },
            ],
            shipping_cost: dec!(0),
            single_seller_shipping_share: dec!(80),
            multi_seller_shipping_share: dec!(40),
        });
        assert_eq!(engine.volume_discount_pct(5), dec!(7));
    }

    #[test]
    fn empty_cart_is_all_zero() {
        let result = engine().compute_totals(&[], None).unwrap();
        assert_eq!(result.final_total, dec!(0));
        assert_eq!(result.shipping_cost, dec!(0));
        assert!(result.items.is_empty());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let seller = Uuid::new_v4();
        let items = [item(0, dec!(10.00), dec!(0), seller)];
        let err = engine().compute_totals(&items, None).unwrap_err();
        assert!(matches!(err, PricingError::ZeroQuantity { .. }));
    }

    #[test]
    fn worked_example_single_seller() {
        // Two items from one seller, qty 12 and 3, tiers {5:5%, 10:10%},
        // no seller discount, 10% coupon, 15% IVA, $5 shipping split 80/20.
        let seller = Uuid::new_v4();
        let items = [
            item(12, dec!(10.00), dec!(0), seller),
            item(3, dec!(20.00), dec!(0), seller),
        ];
        let coupon = CouponDiscount {
            code: "SAVE10".into(),
            pct: dec!(10),
        };
        let result = engine().compute_totals(&items, Some(&coupon)).unwrap();

        // 12 * 10.00 * 0.90 = 108.00; 3 * 20.00 = 60.00
        assert_eq!(result.subtotal_original, dec!(180.00));
        assert_eq!(result.subtotal_with_discounts, dec!(168.00));
        assert_eq!(result.volume_discount_total, dec!(12.00));
        assert_eq!(result.coupon_discount_amount, dec!(16.80));
        assert_eq!(result.iva_amount, dec!(22.68));
        assert_eq!(result.shipping_cost, dec!(5.00));
        assert_eq!(result.final_total, dec!(178.88));

        assert_eq!(result.shipping_breakdown.seller_shares.len(), 1);
        assert_eq!(result.shipping_breakdown.seller_shares[0].amount, dec!(4.00));
        assert_eq!(result.shipping_breakdown.platform_amount, dec!(1.00));
    }

    #[test]
    fn seller_and_volume_discounts_compound() {
        let seller = Uuid::new_v4();
        // 20% seller discount then 10% volume discount on the result.
        let items = [item(10, dec!(100.00), dec!(20), seller)];
        let result = engine().compute_totals(&items, None).unwrap();

        // 100 -> 80 -> 72 per unit, 720 total.
        assert_eq!(result.subtotal_with_discounts, dec!(720.00));
        assert_eq!(result.seller_discount_total, dec!(200.00));
        assert_eq!(result.volume_discount_total, dec!(80.00));
        assert_eq!(result.items[0].discounted_unit_price, dec!(72.00));
    }

    #[test]
    fn coupon_is_capped_at_subtotal() {
        let seller = Uuid::new_v4();
        let items = [item(1, dec!(10.00), dec!(0), seller)];
        let coupon = CouponDiscount {
            code: "ALL".into(),
            pct: dec!(100),
        };
        let result = engine().compute_totals(&items, Some(&coupon)).unwrap();
        assert_eq!(result.coupon_discount_amount, dec!(10.00));
        assert_eq!(result.iva_amount, dec!(0.00));
        // Only shipping remains.
        assert_eq!(result.final_total, dec!(5.00));
    }

    #[test]
    fn multi_seller_shipping_split() {
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let items = [
            item(1, dec!(10.00), dec!(0), s1),
            item(1, dec!(10.00), dec!(0), s2),
        ];
        let result = engine().compute_totals(&items, None).unwrap();
        let shares = &result.shipping_breakdown.seller_shares;
        assert_eq!(shares.len(), 2);
        assert!(shares.iter().all(|s| s.amount == dec!(2.00)));
        assert_eq!(result.shipping_breakdown.platform_amount, dec!(1.00));
        // The split never alters the customer-facing total.
        assert_eq!(
            result.final_total,
            result.subtotal_with_discounts - result.coupon_discount_amount
                + result.iva_amount
                + result.shipping_cost
        );
    }

    #[test]
    fn rounding_happens_once_at_aggregate_level() {
        let seller = Uuid::new_v4();
        // 5 * 3.33 with 5% volume discount: unit 3.1635, line 15.8175.
        // The aggregate rounds once to 15.82 instead of summing rounded lines.
        let items = [item(5, dec!(3.33), dec!(5), seller)];
        let result = engine().compute_totals(&items, None).unwrap();
        assert_eq!(result.subtotal_with_discounts, dec!(15.82));
        assert_eq!(
            result.final_total,
            result.subtotal_with_discounts - result.coupon_discount_amount
                + result.iva_amount
                + result.shipping_cost
        );
    }
}
