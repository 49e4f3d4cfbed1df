//! Payment order management and verification.
//!
//! `create_order` mints a gateway order and records exactly one `pending`
//! transaction. `verify` settles it: signature first, then the authoritative
//! gateway record, then one database transaction that completes the payment
//! and advances the linked request. A transaction reaches `completed` nowhere
//! else.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionError,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::enums::{PaymentMethod, RequestStatus, RequestType, TransactionStatus};
use crate::entities::payment_transaction::{
    self, append_detail, initial_details, Entity as PaymentTransaction, PaymentDetailEntry,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::services::lifecycle::{self, post_payment_status, LifecycleService};
use crate::services::razorpay::{constant_time_eq, payment_signature, PaymentGateway};

/// Convert a major-unit amount to gateway minor units (paise for INR).
/// Rejects non-positive amounts and anything finer than 2 decimal places.
pub fn to_minor_units(amount: Decimal) -> Result<u64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "amount must be positive".to_string(),
        ));
    }
    let minor = amount * Decimal::from(100);
    if minor.fract() != Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "amount must not have more than 2 decimal places".to_string(),
        ));
    }
    minor
        .to_u64()
        .ok_or_else(|| ServiceError::ValidationError("amount is too large".to_string()))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub request_type: RequestType,
    /// Reference to an existing request; omitted for a floating order.
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub transaction_id: i64,
    pub payment_id: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub request_type: RequestType,
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionStatusResponse {
    pub transaction_id: i64,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub request_type: RequestType,
    pub request_id: Option<i64>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    lifecycle: LifecycleService,
    key_secret: String,
    default_currency: String,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        lifecycle: LifecycleService,
        key_secret: String,
        default_currency: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            lifecycle,
            key_secret,
            default_currency,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }

    async fn find_completed(
        &self,
        request_type: RequestType,
        request_id: i64,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        Ok(PaymentTransaction::find()
            .filter(payment_transaction::Column::RequestType.eq(request_type))
            .filter(payment_transaction::Column::RequestId.eq(request_id))
            .filter(payment_transaction::Column::Status.eq(TransactionStatus::Completed))
            .one(self.db.as_ref())
            .await?)
    }

    #[instrument(skip(self, payload), fields(user_id = %user_id, request_type = %payload.request_type, request_id = payload.request_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        payload: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let amount_minor = to_minor_units(payload.amount)?;
        let currency = payload
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());

        if let Some(request_id) = payload.request_id {
            let request = self
                .lifecycle
                .get_owned_request(user_id, payload.request_type, request_id)
                .await?;
            if request.payment_method != PaymentMethod::Online {
                return Err(ServiceError::ValidationError(
                    "request is not payable online".to_string(),
                ));
            }
            if request.total_amount != payload.amount {
                return Err(ServiceError::ValidationError(format!(
                    "amount {} does not match the request total {}",
                    payload.amount, request.total_amount
                )));
            }
            if !matches!(
                request.status,
                RequestStatus::Pending | RequestStatus::Approved | RequestStatus::WaitingPayment
            ) {
                return Err(ServiceError::Conflict(format!(
                    "a request in status {} cannot take a payment",
                    request.status
                )));
            }
            if let Some(existing) = self.find_completed(payload.request_type, request_id).await? {
                return Err(ServiceError::AlreadyPaid {
                    payment_id: existing.gateway_payment_id,
                });
            }
        }

        let receipt = payload
            .request_id
            .map(|id| format!("{}_{}", payload.request_type, id));
        let notes = payload.request_id.map(|id| {
            serde_json::json!({
                "request_type": payload.request_type.to_string(),
                "request_id": id,
                "user_id": user_id.to_string(),
            })
        });

        let order = self
            .gateway
            .create_order(amount_minor, &currency, receipt, notes)
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(e.to_string()))?;

        let order_json = serde_json::to_value(&order).unwrap_or(serde_json::Value::Null);
        let model = payment_transaction::ActiveModel {
            request_type: Set(payload.request_type),
            request_id: Set(payload.request_id),
            user_id: Set(user_id),
            amount: Set(payload.amount),
            currency: Set(currency),
            status: Set(TransactionStatus::Pending),
            gateway_order_id: Set(order.id.clone()),
            gateway_payment_id: Set(None),
            gateway_signature: Set(None),
            payment_details: Set(initial_details(PaymentDetailEntry::order_created(order_json))),
            ..Default::default()
        };
        let inserted = match model.insert(self.db.as_ref()).await {
            Ok(row) => row,
            Err(e) => {
                // the money side exists without a local record; reconcile by hand
                error!(
                    gateway_order_id = %order.id,
                    error = %e,
                    "gateway order created but transaction insert failed"
                );
                return Err(ServiceError::Inconsistent(format!(
                    "gateway order {} has no local transaction",
                    order.id
                )));
            }
        };

        metrics::increment_counter(metrics::names::PAYMENT_ORDERS_CREATED);
        self.emit(Event::PaymentOrderCreated {
            transaction_id: inserted.id,
            gateway_order_id: inserted.gateway_order_id.clone(),
            amount: inserted.amount,
        })
        .await;
        info!(
            transaction_id = inserted.id,
            gateway_order_id = %inserted.gateway_order_id,
            "payment order created"
        );

        Ok(CreateOrderResponse {
            order_id: inserted.gateway_order_id,
            amount: inserted.amount,
            currency: inserted.currency,
            transaction_id: inserted.id,
        })
    }

    /// CAS `pending -> failed`, appending the reason to the audit log. Losing
    /// the race to another writer is logged, not an error.
    async fn mark_failed(
        &self,
        row: &payment_transaction::Model,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let details = append_detail(
            &row.payment_details,
            PaymentDetailEntry::verification_failed(reason),
        );
        let rows = PaymentTransaction::update_many()
            .set(payment_transaction::ActiveModel {
                status: Set(TransactionStatus::Failed),
                payment_details: Set(details),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment_transaction::Column::Id.eq(row.id))
            .filter(payment_transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(self.db.as_ref())
            .await?
            .rows_affected;
        if rows == 0 {
            warn!(
                transaction_id = row.id,
                "transaction changed state before it could be marked failed"
            );
        }
        self.emit(Event::PaymentFailed {
            transaction_id: row.id,
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    fn verified_response(
        row: &payment_transaction::Model,
        fallback_payment_id: &str,
    ) -> VerifyPaymentResponse {
        VerifyPaymentResponse {
            transaction_id: row.id,
            payment_id: row
                .gateway_payment_id
                .clone()
                .unwrap_or_else(|| fallback_payment_id.to_string()),
            amount: row.amount,
            status: row.status,
            request_type: row.request_type,
            request_id: row.request_id,
        }
    }

    #[instrument(skip(self, payload), fields(user_id = %user_id, order_id = %payload.razorpay_order_id))]
    pub async fn verify(
        &self,
        user_id: Uuid,
        payload: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, ServiceError> {
        let txn_row = PaymentTransaction::find()
            .filter(
                payment_transaction::Column::GatewayOrderId.eq(payload.razorpay_order_id.as_str()),
            )
            .filter(payment_transaction::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "transaction for order {}",
                    payload.razorpay_order_id
                ))
            })?;

        match txn_row.status {
            TransactionStatus::Completed => {
                return if txn_row.gateway_payment_id.as_deref()
                    == Some(payload.razorpay_payment_id.as_str())
                {
                    info!(
                        transaction_id = txn_row.id,
                        "verification replay on a settled transaction"
                    );
                    Ok(Self::verified_response(&txn_row, &payload.razorpay_payment_id))
                } else {
                    Err(ServiceError::Conflict(
                        "transaction already completed with a different payment".to_string(),
                    ))
                };
            }
            TransactionStatus::Failed => {
                return Err(ServiceError::Conflict(
                    "transaction already failed; create a new order".to_string(),
                ));
            }
            TransactionStatus::Pending => {}
        }

        // signature check precedes any network call
        let expected = payment_signature(
            &self.key_secret,
            &payload.razorpay_order_id,
            &payload.razorpay_payment_id,
        );
        if !constant_time_eq(&expected, &payload.razorpay_signature) {
            metrics::increment_counter(metrics::names::SIGNATURE_FAILURES);
            self.mark_failed(&txn_row, "signature_mismatch").await?;
            return Err(ServiceError::SecurityViolation(format!(
                "signature mismatch for order {}",
                payload.razorpay_order_id
            )));
        }

        // transaction stays pending on fetch failure so the caller can retry
        let payment = self
            .gateway
            .fetch_payment(&payload.razorpay_payment_id)
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(e.to_string()))?;

        if !payment.is_captured() {
            let reason = payment.failure_reason();
            metrics::increment_counter(metrics::names::PAYMENTS_FAILED);
            self.mark_failed(&txn_row, &reason).await?;
            return Err(ServiceError::PaymentNotCaptured(reason));
        }

        let payment_json = serde_json::to_value(&payment).unwrap_or(serde_json::Value::Null);
        let details = append_detail(
            &txn_row.payment_details,
            PaymentDetailEntry::verification_succeeded(payment_json),
        );
        let request_ref = txn_row.request_id.map(|id| (txn_row.request_type, id));
        let txn_id = txn_row.id;
        let payment_id = payload.razorpay_payment_id.clone();
        let signature = payload.razorpay_signature.clone();

        let settled = self
            .db
            .transaction::<_, payment_transaction::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let rows = PaymentTransaction::update_many()
                        .set(payment_transaction::ActiveModel {
                            status: Set(TransactionStatus::Completed),
                            gateway_payment_id: Set(Some(payment_id)),
                            gateway_signature: Set(Some(signature)),
                            payment_details: Set(details),
                            updated_at: Set(Utc::now()),
                            ..Default::default()
                        })
                        .filter(payment_transaction::Column::Id.eq(txn_id))
                        .filter(payment_transaction::Column::Status.eq(TransactionStatus::Pending))
                        .exec(txn)
                        .await?
                        .rows_affected;
                    if rows == 0 {
                        return Err(ServiceError::Conflict(
                            "transaction was settled concurrently".to_string(),
                        ));
                    }

                    if let Some((request_type, request_id)) = request_ref {
                        lifecycle::advance_on_payment(txn, request_type, request_id).await?;
                    }

                    PaymentTransaction::find_by_id(txn_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", txn_id)))
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::from(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        metrics::increment_counter(metrics::names::PAYMENTS_COMPLETED);
        self.emit(Event::PaymentCompleted {
            transaction_id: settled.id,
            gateway_payment_id: payload.razorpay_payment_id.clone(),
        })
        .await;
        if let Some((request_type, request_id)) = request_ref {
            self.emit(Event::RequestStatusChanged {
                request_type,
                request_id,
                old_status: RequestStatus::WaitingPayment,
                new_status: post_payment_status(request_type),
            })
            .await;
        }
        info!(
            transaction_id = settled.id,
            payment_id = %payload.razorpay_payment_id,
            "payment verified and settled"
        );

        Ok(Self::verified_response(&settled, &payload.razorpay_payment_id))
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_status(
        &self,
        user_id: Uuid,
        order_id: &str,
    ) -> Result<TransactionStatusResponse, ServiceError> {
        let row = PaymentTransaction::find()
            .filter(payment_transaction::Column::GatewayOrderId.eq(order_id))
            .filter(payment_transaction::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction for order {}", order_id)))?;

        Ok(TransactionStatusResponse {
            transaction_id: row.id,
            order_id: row.gateway_order_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            request_type: row.request_type,
            request_id: row.request_id,
            payment_id: row.gateway_payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
