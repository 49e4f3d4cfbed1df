//! Coupon evaluation.
//!
//! `evaluate` is a pure function over the coupon row and the request being
//! priced; [`CouponService`] wraps it with the code lookup so handlers and the
//! lifecycle service share one implementation. Evaluating the same inputs
//! always yields the same discount; coupons never stack.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::db::DbPool;
use crate::entities::coupon::{self, Entity as Coupon};
use crate::entities::enums::{DiscountType, RequestType};
use crate::errors::ServiceError;
use crate::metrics;

/// Why a coupon did not apply. The display text is client-facing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    ScopeMismatch,
    MinimumNotMet { minimum: Decimal },
    NoEligibleItems,
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouponRejection::NotFound => write!(f, "coupon code not found"),
            CouponRejection::Inactive => write!(f, "coupon is not active"),
            CouponRejection::NotYetValid => write!(f, "coupon is not valid yet"),
            CouponRejection::Expired => write!(f, "coupon has expired"),
            CouponRejection::ScopeMismatch => {
                write!(f, "coupon does not apply to this request type")
            }
            CouponRejection::MinimumNotMet { minimum } => {
                write!(f, "order total is below the coupon minimum of {}", minimum)
            }
            CouponRejection::NoEligibleItems => {
                write!(f, "no items in this request are eligible for the coupon")
            }
        }
    }
}

/// The outcome of a successful evaluation. Serialized camelCase because this
/// is the wire shape of `POST /api/coupon/apply`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponDiscount {
    pub code: String,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
}

/// Evaluate a coupon against a request. Pure: no clock reads, no I/O.
///
/// `items` are the item-category tags of the request (service categories for
/// repairs, the bicycle category for rentals). The returned discount is always
/// within `[0, total_amount]`.
pub fn evaluate(
    coupon: &coupon::Model,
    request_type: RequestType,
    items: &[String],
    total_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<CouponDiscount, CouponRejection> {
    if !coupon.active {
        return Err(CouponRejection::Inactive);
    }
    if let Some(from) = coupon.valid_from {
        if now < from {
            return Err(CouponRejection::NotYetValid);
        }
    }
    if let Some(until) = coupon.valid_until {
        if now > until {
            return Err(CouponRejection::Expired);
        }
    }
    if !coupon.applies_to.covers(request_type) {
        return Err(CouponRejection::ScopeMismatch);
    }
    if let Some(minimum) = coupon.min_amount {
        if total_amount < minimum {
            return Err(CouponRejection::MinimumNotMet { minimum });
        }
    }
    if let Some(categories) = coupon.categories() {
        let eligible = items.iter().any(|item| categories.contains(item));
        if !eligible {
            return Err(CouponRejection::NoEligibleItems);
        }
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => (total_amount * coupon.discount_value
            / Decimal::from(100))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        DiscountType::Fixed => coupon.discount_value.min(total_amount),
    };
    let discount = raw.max(Decimal::ZERO).min(total_amount);

    Ok(CouponDiscount {
        code: coupon.code.clone(),
        discount,
        discount_type: coupon.discount_type,
        discount_value: coupon.discount_value,
    })
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Look up a coupon by code and evaluate it against the given request
    /// shape. Validity, scope, and minimum checks all happen in `evaluate` so
    /// every rejection carries its precise reason.
    #[instrument(skip(self, items), fields(code = %code, request_type = %request_type))]
    pub async fn apply(
        &self,
        code: &str,
        request_type: RequestType,
        items: &[String],
        total_amount: Decimal,
    ) -> Result<CouponDiscount, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "coupon code must not be empty".to_string(),
            ));
        }
        if total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "total amount must be positive".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "items must not be empty".to_string(),
            ));
        }

        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::CouponRejected(CouponRejection::NotFound))?;

        let result = evaluate(&coupon, request_type, items, total_amount, Utc::now())
            .map_err(ServiceError::CouponRejected)?;

        debug!(
            code = %result.code,
            discount = %result.discount,
            "coupon evaluated"
        );
        metrics::increment_counter(metrics::names::COUPONS_APPLIED);

        Ok(result)
    }
}
