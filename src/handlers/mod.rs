pub mod coupons;
pub mod payments;
pub mod requests;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::coupons::CouponService;
use crate::services::lifecycle::LifecycleService;
use crate::services::payments::PaymentService;
use crate::services::razorpay::PaymentGateway;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub lifecycle: Arc<LifecycleService>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
}

impl AppServices {
    /// Wire the service graph. The gateway is injected so tests can substitute
    /// a scripted one.
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let coupons = CouponService::new(db.clone());
        let lifecycle = LifecycleService::new(
            db.clone(),
            coupons.clone(),
            event_sender.clone(),
            config.request_expiry(),
        );
        let payments = PaymentService::new(
            db,
            gateway,
            lifecycle.clone(),
            config.razorpay_key_secret.clone(),
            config.default_currency.clone(),
            event_sender,
        );

        Self {
            lifecycle: Arc::new(lifecycle),
            payments: Arc::new(payments),
            coupons: Arc::new(coupons),
        }
    }
}
