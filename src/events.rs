//! Domain events.
//!
//! Services publish onto a bounded mpsc channel; a background task consumes,
//! logs, and feeds the status-change notification de-dup set. Event emission
//! is best-effort: a full channel is logged and dropped, never blocks a
//! request handler past the channel backpressure.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::enums::{RequestStatus, RequestType};
use crate::metrics;
use crate::notifier::TtlSet;

#[derive(Debug, Clone)]
pub enum Event {
    RequestCreated {
        request_type: RequestType,
        request_id: i64,
        user_id: Uuid,
    },
    RequestStatusChanged {
        request_type: RequestType,
        request_id: i64,
        old_status: RequestStatus,
        new_status: RequestStatus,
    },
    PaymentOrderCreated {
        transaction_id: i64,
        gateway_order_id: String,
        amount: Decimal,
    },
    PaymentCompleted {
        transaction_id: i64,
        gateway_payment_id: String,
    },
    PaymentFailed {
        transaction_id: i64,
        reason: String,
    },
    CouponApplied {
        request_type: RequestType,
        code: String,
        discount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {}", e))
    }
}

/// Consume events until every sender is dropped. `notifications` is the
/// shared TTL set; a transition that passes it counts as one user-visible
/// notification.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifications: Arc<TtlSet>) {
    info!("starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::RequestCreated {
                request_type,
                request_id,
                user_id,
            } => {
                info!(
                    request_type = %request_type,
                    request_id,
                    user_id = %user_id,
                    "request created"
                );
            }
            Event::RequestStatusChanged {
                request_type,
                request_id,
                old_status,
                new_status,
            } => {
                let fresh = notifications.insert(
                    (request_type, request_id, old_status, new_status),
                    Utc::now(),
                );
                if fresh {
                    metrics::increment_counter(metrics::names::STATUS_NOTIFICATIONS);
                    info!(
                        target: "notifications",
                        request_type = %request_type,
                        request_id,
                        old_status = %old_status,
                        new_status = %new_status,
                        "request status changed"
                    );
                } else {
                    debug!(
                        request_type = %request_type,
                        request_id,
                        old_status = %old_status,
                        new_status = %new_status,
                        "duplicate status change suppressed"
                    );
                }
            }
            Event::PaymentOrderCreated {
                transaction_id,
                gateway_order_id,
                amount,
            } => {
                info!(
                    transaction_id,
                    gateway_order_id = %gateway_order_id,
                    amount = %amount,
                    "payment order created"
                );
            }
            Event::PaymentCompleted {
                transaction_id,
                gateway_payment_id,
            } => {
                info!(
                    transaction_id,
                    gateway_payment_id = %gateway_payment_id,
                    "payment completed"
                );
            }
            Event::PaymentFailed {
                transaction_id,
                reason,
            } => {
                warn!(transaction_id, reason = %reason, "payment failed");
            }
            Event::CouponApplied {
                request_type,
                code,
                discount,
            } => {
                info!(
                    request_type = %request_type,
                    code = %code,
                    discount = %discount,
                    "coupon applied"
                );
            }
        }
    }

    info!("event processing loop stopped");
}
