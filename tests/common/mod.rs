// Shared harness for the integration tests. Not every test binary uses every
// helper.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Method, Request},
    middleware,
    routing::get,
    Router,
};
use cyclehub_api::{
    auth::{permissions, AuthService},
    config::AppConfig,
    db,
    entities::coupon,
    entities::enums::{CouponScope, DiscountType},
    events::{self, EventSender},
    handlers::AppServices,
    notifier::TtlSet,
    services::razorpay::{
        payment_signature, GatewayError, PaymentGateway, RazorpayOrder, RazorpayPayment,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_RAZORPAY_SECRET: &str = "rzp_test_secret_for_signature_checks";

/// Gateway double driven by queued responses. With an empty script,
/// `create_order` mints sequential `order_test_N` ids and `fetch_payment`
/// reports a captured payment, which is what the happy paths need. Tests that
/// exercise failures push the response they want observed next.
#[derive(Default)]
pub struct ScriptedGateway {
    orders: Mutex<VecDeque<Result<RazorpayOrder, GatewayError>>>,
    payments: Mutex<VecDeque<Result<RazorpayPayment, GatewayError>>>,
    minted: AtomicU64,
    last_amount: AtomicU64,
}

impl ScriptedGateway {
    pub fn push_order(&self, response: Result<RazorpayOrder, GatewayError>) {
        self.orders.lock().unwrap().push_back(response);
    }

    pub fn push_payment(&self, response: Result<RazorpayPayment, GatewayError>) {
        self.payments.lock().unwrap().push_back(response);
    }

    /// Scripted fetch responses not yet consumed.
    pub fn queued_payments(&self) -> usize {
        self.payments.lock().unwrap().len()
    }

    pub fn captured_payment(payment_id: &str, order_id: &str, amount: u64) -> RazorpayPayment {
        RazorpayPayment {
            id: payment_id.to_string(),
            amount,
            currency: "INR".to_string(),
            status: "captured".to_string(),
            order_id: Some(order_id.to_string()),
            method: Some("upi".to_string()),
            captured: Some(true),
            error_code: None,
            error_description: None,
            created_at: None,
        }
    }

    pub fn failed_payment(payment_id: &str, description: &str) -> RazorpayPayment {
        RazorpayPayment {
            id: payment_id.to_string(),
            amount: 0,
            currency: "INR".to_string(),
            status: "failed".to_string(),
            order_id: None,
            method: Some("card".to_string()),
            captured: Some(false),
            error_code: Some("BAD_REQUEST_ERROR".to_string()),
            error_description: Some(description.to_string()),
            created_at: None,
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: Option<String>,
        notes: Option<serde_json::Value>,
    ) -> Result<RazorpayOrder, GatewayError> {
        if let Some(scripted) = self.orders.lock().unwrap().pop_front() {
            return scripted;
        }
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_amount.store(amount_minor, Ordering::SeqCst);
        Ok(RazorpayOrder {
            id: format!("order_test_{}", n),
            amount: amount_minor,
            currency: currency.to_string(),
            receipt,
            status: "created".to_string(),
            notes,
            created_at: None,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, GatewayError> {
        if let Some(scripted) = self.payments.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Self::captured_payment(
            payment_id,
            "order_unknown",
            self.last_amount.load(Ordering::SeqCst),
        ))
    }
}

/// Helper harness wiring the full router against a tempfile-backed SQLite
/// database and the scripted gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    auth_service: Arc<AuthService>,
    user_id: Uuid,
    token: String,
    operator_token: String,
    _db_dir: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for the test database");
        let db_path = db_dir.path().join("cyclehub_test.db");

        let cfg: AppConfig = serde_json::from_value(json!({
            "database_url": format!("sqlite://{}?mode=rwc", db_path.display()),
            "jwt_secret": TEST_JWT_SECRET,
            "environment": "test",
            "db_max_connections": 1,
            "db_min_connections": 1,
            "razorpay_key_id": "rzp_test_key",
            "razorpay_key_secret": TEST_RAZORPAY_SECRET,
        }))
        .expect("test config deserializes");

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let notifications = Arc::new(TtlSet::new(cfg.notification_retention()));
        let event_task = tokio::spawn(events::process_events(event_rx, notifications));

        let gateway = Arc::new(ScriptedGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            gateway.clone() as Arc<dyn PaymentGateway>,
            Some(event_sender),
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            services,
        };

        let auth_service = Arc::new(AuthService::new(&cfg.jwt_secret));
        let user_id = Uuid::new_v4();
        let token = auth_service
            .generate_token(user_id, vec!["user".to_string()], vec![])
            .expect("mint user token");
        let operator_token = auth_service
            .generate_token(
                Uuid::new_v4(),
                vec!["operator".to_string()],
                vec![permissions::REQUESTS_MANAGE.to_string()],
            )
            .expect("mint operator token");

        let auth_for_layer = auth_service.clone();
        let api = cyclehub_api::api_routes().layer(middleware::from_fn_with_state(
            auth_for_layer,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: Request<Body>,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ));
        let router = Router::new()
            .route("/health", get(cyclehub_api::health_check))
            .nest("/api", api)
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            auth_service,
            user_id,
            token,
            operator_token,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// The default (non-operator) user of this app instance.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Bearer token of the default user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bearer token of a user holding `requests:manage`.
    pub fn operator_token(&self) -> &str {
        &self.operator_token
    }

    /// Mint a token for an arbitrary user, e.g. to probe ownership checks.
    pub fn token_for(&self, user_id: Uuid, permissions: Vec<String>) -> String {
        self.auth_service
            .generate_token(user_id, vec!["user".to_string()], permissions)
            .expect("mint token")
    }

    /// The checkout signature the gateway would hand back for this pair.
    pub fn valid_signature(&self, order_id: &str, payment_id: &str) -> String {
        payment_signature(&self.state.config.razorpay_key_secret, order_id, payment_id)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests authenticated as the default user.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Convenience helper for requests authenticated as the operator.
    pub async fn request_as_operator(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let token = self.operator_token.clone();
        self.request(method, uri, body, Some(&token)).await
    }

    /// Insert an unrestricted, active coupon.
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        applies_to: CouponScope,
    ) -> coupon::Model {
        coupon::ActiveModel {
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            applies_to: Set(applies_to),
            min_amount: Set(None),
            applicable_categories: Set(None),
            active: Set(true),
            valid_from: Set(None),
            valid_until: Set(None),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed coupon for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
