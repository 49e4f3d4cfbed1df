// Request lifecycle
pub mod lifecycle;

// Pricing
pub mod coupons;

// Payments
pub mod payments;
pub mod razorpay;
