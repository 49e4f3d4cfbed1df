//! sea-orm entities for the booking core.
//!
//! Two request tables (repair, rental) share one status vocabulary; payment
//! transactions reference at most one request by `(request_type, request_id)`;
//! coupons are a read-only lookup table.

pub mod coupon;
pub mod enums;
pub mod payment_transaction;
pub mod repair_request;
pub mod rental_request;

pub use enums::{
    CouponScope, DiscountType, PaymentMethod, RequestStatus, RequestType, TransactionStatus,
};
