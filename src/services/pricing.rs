use crate::{
    db::DbPool,
    entities::coupon::{self, Entity as CouponEntity},
    errors::ServiceError,
    services::cart::PricedCartLine,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

/// Canonical money rounding: half away from zero, two decimal places.
/// Applied at every multiplication (tax, discount, commission) so that sums
/// of line-level figures reconcile exactly with order-level totals.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Platform/vendor split of one monetary amount. The commission is rounded
/// once; the vendor earning is the exact complement, so the two always sum
/// back to the input amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub commission: Decimal,
    pub vendor_earning: Decimal,
}

/// Coupon terms captured at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponSnapshot {
    pub code: String,
    pub discount_amount: Decimal,
}

/// Pricing preview returned by the coupon-apply endpoint; no side effects.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricePreview {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
}

/// Computes order-level totals from priced cart lines.
pub fn compute_totals(lines: &[PricedCartLine], tax_rate: Decimal) -> Totals {
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
    let tax = round_money(subtotal * tax_rate);
    Totals {
        subtotal,
        tax,
        total: subtotal + tax,
    }
}

/// Splits an amount into platform commission and vendor earning.
pub fn split_commission(amount: Decimal, rate: Decimal) -> CommissionSplit {
    let commission = round_money(amount * rate);
    CommissionSplit {
        commission,
        vendor_earning: amount - commission,
    }
}

/// Applies a coupon to a subtotal, enforcing activity, expiry and minimum
/// purchase. The discount is a flat percentage of the subtotal, clamped so a
/// discounted total can never go negative.
pub fn apply_coupon(
    coupon: &coupon::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<CouponSnapshot, ServiceError> {
    if !coupon.is_active {
        return Err(ServiceError::InvalidCoupon(format!(
            "coupon {} is inactive",
            coupon.code
        )));
    }
    if now >= coupon.expires_at {
        return Err(ServiceError::InvalidCoupon(format!(
            "coupon {} has expired",
            coupon.code
        )));
    }
    if subtotal < coupon.min_purchase {
        return Err(ServiceError::InvalidCoupon(format!(
            "subtotal below minimum purchase of {}",
            coupon.min_purchase
        )));
    }

    let discount = round_money(subtotal * coupon.discount_percent / Decimal::from(100));
    Ok(CouponSnapshot {
        code: coupon.code.clone(),
        discount_amount: discount.min(subtotal),
    })
}

/// Pricing and commission calculator backed by the coupon store.
#[derive(Clone)]
pub struct PricingService {
    db_pool: Arc<DbPool>,
    tax_rate: Decimal,
    commission_rate: Decimal,
}

impl PricingService {
    pub fn new(db_pool: Arc<DbPool>, tax_rate: Decimal, commission_rate: Decimal) -> Self {
        Self {
            db_pool,
            tax_rate,
            commission_rate,
        }
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Looks up an active coupon by code and validates it against a subtotal.
    #[instrument(skip(self))]
    pub async fn validate_coupon(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponSnapshot, ServiceError> {
        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::InvalidCoupon(format!("coupon {code} not found")))?;

        apply_coupon(&coupon, subtotal, Utc::now())
    }

    /// Pricing preview over a priced snapshot: totals plus optional coupon
    /// discount, without committing anything.
    #[instrument(skip(self, lines))]
    pub async fn preview(
        &self,
        lines: &[PricedCartLine],
        coupon_code: Option<&str>,
    ) -> Result<PricePreview, ServiceError> {
        let totals = compute_totals(lines, self.tax_rate);
        let snapshot = match coupon_code {
            Some(code) => Some(self.validate_coupon(code, totals.subtotal).await?),
            None => None,
        };
        let discount = snapshot
            .as_ref()
            .map(|s| s.discount_amount)
            .unwrap_or_default();

        Ok(PricePreview {
            subtotal: totals.subtotal,
            tax: totals.tax,
            discount,
            total: totals.total - discount,
            coupon_code: snapshot.map(|s| s.code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use test_case::test_case;
    use uuid::Uuid;

    fn line(total: Decimal) -> PricedCartLine {
        PricedCartLine {
            product_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: "SKU-1".into(),
            name: "Widget".into(),
            quantity: 1,
            unit_price: total,
            line_total: total,
        }
    }

    fn coupon(percent: Decimal, min_purchase: Decimal, expires_in_days: i64) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            discount_percent: percent,
            min_purchase,
            expires_at: Utc::now() + Duration::days(expires_in_days),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subtotal_1000_at_18_percent_tax() {
        let totals = compute_totals(&[line(dec!(1000))], dec!(0.18));
        assert_eq!(totals.subtotal, dec!(1000));
        assert_eq!(totals.tax, dec!(180.00));
        assert_eq!(totals.total, dec!(1180.00));
    }

    #[test_case(dec!(33.33), dec!(6.00) ; "5.9994 rounds up to 6.00")]
    #[test_case(dec!(0.05), dec!(0.01) ; "0.009 rounds half away from zero")]
    #[test_case(dec!(100), dec!(18.00) ; "exact product keeps two decimals")]
    fn tax_rounding_is_canonical(subtotal: Decimal, expected_tax: Decimal) {
        let totals = compute_totals(&[line(subtotal)], dec!(0.18));
        assert_eq!(totals.tax, expected_tax);
    }

    #[test]
    fn commission_and_vendor_earning_sum_to_amount() {
        for amount in [dec!(400), dec!(600), dec!(99.99), dec!(0.01), dec!(333.33)] {
            let split = split_commission(amount, dec!(0.10));
            assert_eq!(split.commission + split.vendor_earning, amount);
        }
        let split = split_commission(dec!(1000), dec!(0.10));
        assert_eq!(split.commission, dec!(100.00));
        assert_eq!(split.vendor_earning, dec!(900.00));
    }

    #[test]
    fn coupon_above_minimum_purchase_applies_flat_percentage() {
        let c = coupon(dec!(10), dec!(1000), 30);
        let snap = apply_coupon(&c, dec!(1200), Utc::now()).unwrap();
        assert_eq!(snap.discount_amount, dec!(120.00));
    }

    #[test]
    fn coupon_below_minimum_purchase_rejected() {
        let c = coupon(dec!(10), dec!(1000), 30);
        let err = apply_coupon(&c, dec!(900), Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCoupon(_)));
    }

    #[test]
    fn expired_or_inactive_coupon_rejected() {
        let c = coupon(dec!(10), dec!(0), -1);
        assert!(apply_coupon(&c, dec!(500), Utc::now()).is_err());

        let mut c = coupon(dec!(10), dec!(0), 30);
        c.is_active = false;
        assert!(apply_coupon(&c, dec!(500), Utc::now()).is_err());
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let c = coupon(dec!(100), dec!(0), 30);
        let snap = apply_coupon(&c, dec!(250), Utc::now()).unwrap();
        assert_eq!(snap.discount_amount, dec!(250));
    }
}
