//! Request lifecycle state machine.
//!
//! Repair and rental requests move through a fixed set of states; every
//! status write is a conditional update on the expected prior status, so
//! concurrent writers serialize per request and the loser sees
//! `IllegalTransition`. Expiry is applied lazily whenever a request is read
//! and by an optional background sweep; both are permanent once applied.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::enums::{PaymentMethod, RequestStatus, RequestType};
use crate::entities::repair_request::{self, Entity as RepairRequest, ServiceItem};
use crate::entities::rental_request::{self, Entity as RentalRequest};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::services::coupons::CouponService;

/// The edge table of the state machine. `payment_method` matters because
/// approval routes online requests through `waiting_payment` and offline
/// requests straight into fulfillment.
pub fn is_legal_transition(
    request_type: RequestType,
    payment_method: PaymentMethod,
    from: RequestStatus,
    to: RequestStatus,
) -> bool {
    use RequestStatus::*;
    match (from, to) {
        (Pending, Approved) | (Pending, Rejected) | (Pending, Expired) => true,
        (Approved, WaitingPayment) => payment_method == PaymentMethod::Online,
        (Approved, Active) => {
            request_type == RequestType::Repair && payment_method == PaymentMethod::Offline
        }
        (Approved, ArrangingDelivery) => {
            request_type == RequestType::Rental && payment_method == PaymentMethod::Offline
        }
        (WaitingPayment, Active) => request_type == RequestType::Repair,
        (WaitingPayment, ArrangingDelivery) => request_type == RequestType::Rental,
        (ArrangingDelivery, ActiveRental) => request_type == RequestType::Rental,
        (Active, Completed) => request_type == RequestType::Repair,
        (ActiveRental, Completed) => request_type == RequestType::Rental,
        _ => false,
    }
}

/// Where approval lands a request. Online requests become payable
/// immediately; offline requests skip payment and enter fulfillment.
pub fn approval_destination(
    request_type: RequestType,
    payment_method: PaymentMethod,
) -> RequestStatus {
    match payment_method {
        PaymentMethod::Online => RequestStatus::WaitingPayment,
        PaymentMethod::Offline => match request_type {
            RequestType::Repair => RequestStatus::Active,
            RequestType::Rental => RequestStatus::ArrangingDelivery,
        },
    }
}

/// Where a captured payment moves a `waiting_payment` request.
pub fn post_payment_status(request_type: RequestType) -> RequestStatus {
    match request_type {
        RequestType::Repair => RequestStatus::Active,
        RequestType::Rental => RequestStatus::ArrangingDelivery,
    }
}

fn completion_source(request_type: RequestType) -> RequestStatus {
    match request_type {
        RequestType::Repair => RequestStatus::Active,
        RequestType::Rental => RequestStatus::ActiveRental,
    }
}

fn not_found(request_type: RequestType, id: i64) -> ServiceError {
    ServiceError::NotFound(format!("{} request {}", request_type, id))
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRepairRequest {
    #[validate(length(min = 1, message = "at least one service item is required"))]
    pub service_items: Vec<ServiceItem>,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRentalRequest {
    pub bicycle_id: i64,
    #[validate(length(min = 1, message = "bicycle category is required"))]
    pub bicycle_category: String,
    pub daily_rate: Decimal,
    #[validate(range(min = 1, max = 365, message = "duration must be between 1 and 365 days"))]
    pub duration_days: i32,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

/// A request of either type, as returned to clients. Repair-only and
/// rental-only fields are `None` for the other type.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequestRecord {
    pub id: i64,
    pub request_type: RequestType,
    pub user_id: Uuid,
    pub status: RequestStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_items: Option<Vec<ServiceItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bicycle_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bicycle_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_rate: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i32>,
}

impl RequestRecord {
    pub fn from_repair(model: repair_request::Model) -> Self {
        let service_items: Vec<ServiceItem> =
            serde_json::from_value(model.service_items).unwrap_or_default();
        Self {
            id: model.id,
            request_type: RequestType::Repair,
            user_id: model.user_id,
            status: model.status,
            payment_method: model.payment_method,
            total_amount: model.total_amount,
            coupon_code: model.coupon_code,
            rejection_note: model.rejection_note,
            expires_at: model.expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
            service_items: Some(service_items),
            bicycle_id: None,
            bicycle_category: None,
            daily_rate: None,
            duration_days: None,
        }
    }

    pub fn from_rental(model: rental_request::Model) -> Self {
        Self {
            id: model.id,
            request_type: RequestType::Rental,
            user_id: model.user_id,
            status: model.status,
            payment_method: model.payment_method,
            total_amount: model.total_amount,
            coupon_code: model.coupon_code,
            rejection_note: model.rejection_note,
            expires_at: model.expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
            service_items: None,
            bicycle_id: Some(model.bicycle_id),
            bicycle_category: Some(model.bicycle_category),
            daily_rate: Some(model.daily_rate),
            duration_days: Some(model.duration_days),
        }
    }
}

/// Conditional status write: `SET status = to WHERE id = ? AND status =
/// from`. Leaving `pending` always clears `expires_at` (the invariant is
/// `status == pending` iff `expires_at` is set). Returns whether a row moved.
pub(crate) async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    request_type: RequestType,
    id: i64,
    from: RequestStatus,
    to: RequestStatus,
    rejection_note: Option<String>,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let rows = match request_type {
        RequestType::Repair => {
            let mut update = repair_request::ActiveModel {
                status: Set(to),
                updated_at: Set(now),
                ..Default::default()
            };
            if from == RequestStatus::Pending {
                update.expires_at = Set(None);
            }
            if let Some(note) = rejection_note {
                update.rejection_note = Set(Some(note));
            }
            RepairRequest::update_many()
                .set(update)
                .filter(repair_request::Column::Id.eq(id))
                .filter(repair_request::Column::Status.eq(from))
                .exec(conn)
                .await?
                .rows_affected
        }
        RequestType::Rental => {
            let mut update = rental_request::ActiveModel {
                status: Set(to),
                updated_at: Set(now),
                ..Default::default()
            };
            if from == RequestStatus::Pending {
                update.expires_at = Set(None);
            }
            if let Some(note) = rejection_note {
                update.rejection_note = Set(Some(note));
            }
            RentalRequest::update_many()
                .set(update)
                .filter(rental_request::Column::Id.eq(id))
                .filter(rental_request::Column::Status.eq(from))
                .exec(conn)
                .await?
                .rows_affected
        }
    };
    Ok(rows > 0)
}

async fn current_status<C: ConnectionTrait>(
    conn: &C,
    request_type: RequestType,
    id: i64,
) -> Result<Option<RequestStatus>, ServiceError> {
    let status = match request_type {
        RequestType::Repair => RepairRequest::find_by_id(id)
            .one(conn)
            .await?
            .map(|model| model.status),
        RequestType::Rental => RentalRequest::find_by_id(id)
            .one(conn)
            .await?
            .map(|model| model.status),
    };
    Ok(status)
}

/// Move a request out of `waiting_payment` after a captured payment. Runs on
/// the caller's connection so the payment verifier can include it in the same
/// database transaction as the payment-transaction write.
pub async fn advance_on_payment<C: ConnectionTrait>(
    conn: &C,
    request_type: RequestType,
    request_id: i64,
) -> Result<RequestStatus, ServiceError> {
    let to = post_payment_status(request_type);
    if apply_transition(
        conn,
        request_type,
        request_id,
        RequestStatus::WaitingPayment,
        to,
        None,
    )
    .await?
    {
        return Ok(to);
    }
    match current_status(conn, request_type, request_id).await? {
        Some(current) => Err(ServiceError::IllegalTransition {
            from: current.to_string(),
            to: to.to_string(),
        }),
        None => Err(not_found(request_type, request_id)),
    }
}

/// Bulk-expire every overdue `pending` request. Used by the background
/// sweep; the same transition also happens lazily on read.
pub async fn expire_overdue(db: &DbPool) -> Result<u64, ServiceError> {
    let now = Utc::now();
    let repairs = RepairRequest::update_many()
        .set(repair_request::ActiveModel {
            status: Set(RequestStatus::Expired),
            expires_at: Set(None),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(repair_request::Column::Status.eq(RequestStatus::Pending))
        .filter(repair_request::Column::ExpiresAt.lt(now))
        .exec(db)
        .await?
        .rows_affected;
    let rentals = RentalRequest::update_many()
        .set(rental_request::ActiveModel {
            status: Set(RequestStatus::Expired),
            expires_at: Set(None),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(rental_request::Column::Status.eq(RequestStatus::Pending))
        .filter(rental_request::Column::ExpiresAt.lt(now))
        .exec(db)
        .await?
        .rows_affected;

    let total = repairs + rentals;
    if total > 0 {
        metrics::increment_counter_by(metrics::names::REQUESTS_EXPIRED, total);
    }
    Ok(total)
}

/// Background worker sweeping overdue requests on an interval. An interval of
/// zero disables the sweep; lazy expiry at read time still applies.
pub fn start_expiry_sweeper(db: Arc<DbPool>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("expiry sweep disabled; relying on lazy expiry at read time");
        return None;
    }
    Some(tokio::spawn(async move {
        loop {
            match expire_overdue(db.as_ref()).await {
                Ok(0) => {}
                Ok(count) => info!(count, "expiry sweep marked overdue requests"),
                Err(e) => error!("expiry sweep failed: {}", e),
            }
            sleep(std::time::Duration::from_secs(interval_secs)).await;
        }
    }))
}

#[derive(Clone)]
pub struct LifecycleService {
    db: Arc<DbPool>,
    coupons: CouponService,
    event_sender: Option<Arc<EventSender>>,
    request_expiry: Duration,
}

impl LifecycleService {
    pub fn new(
        db: Arc<DbPool>,
        coupons: CouponService,
        event_sender: Option<Arc<EventSender>>,
        request_expiry: Duration,
    ) -> Self {
        Self {
            db,
            coupons,
            event_sender,
            request_expiry,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }

    /// Apply the coupon (when given) and return the final total plus the
    /// recorded code.
    async fn discounted_total(
        &self,
        request_type: RequestType,
        coupon_code: Option<&str>,
        items: &[String],
        subtotal: Decimal,
    ) -> Result<(Decimal, Option<String>), ServiceError> {
        if subtotal <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "order total must be positive".to_string(),
            ));
        }
        match coupon_code {
            Some(code) => {
                let applied = self
                    .coupons
                    .apply(code, request_type, items, subtotal)
                    .await?;
                self.emit(Event::CouponApplied {
                    request_type,
                    code: applied.code.clone(),
                    discount: applied.discount,
                })
                .await;
                Ok((subtotal - applied.discount, Some(applied.code)))
            }
            None => Ok((subtotal, None)),
        }
    }

    #[instrument(skip(self, payload), fields(user_id = %user_id))]
    pub async fn create_repair(
        &self,
        user_id: Uuid,
        payload: CreateRepairRequest,
    ) -> Result<RequestRecord, ServiceError> {
        payload.validate()?;
        if payload
            .service_items
            .iter()
            .any(|item| item.price <= Decimal::ZERO)
        {
            return Err(ServiceError::ValidationError(
                "service item prices must be positive".to_string(),
            ));
        }

        let subtotal: Decimal = payload.service_items.iter().map(|item| item.price).sum();
        let categories: Vec<String> = payload
            .service_items
            .iter()
            .map(|item| item.category.clone())
            .collect();
        let (total, coupon_code) = self
            .discounted_total(
                RequestType::Repair,
                payload.coupon_code.as_deref(),
                &categories,
                subtotal,
            )
            .await?;

        let service_items = serde_json::to_value(&payload.service_items)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let model = repair_request::ActiveModel {
            user_id: Set(user_id),
            status: Set(RequestStatus::Pending),
            payment_method: Set(payload.payment_method),
            total_amount: Set(total),
            coupon_code: Set(coupon_code),
            service_items: Set(service_items),
            rejection_note: Set(None),
            expires_at: Set(Some(Utc::now() + self.request_expiry)),
            ..Default::default()
        };
        let inserted = model.insert(self.db.as_ref()).await?;

        metrics::increment_counter(metrics::names::REQUESTS_CREATED);
        self.emit(Event::RequestCreated {
            request_type: RequestType::Repair,
            request_id: inserted.id,
            user_id,
        })
        .await;
        info!(
            request_id = inserted.id,
            total = %inserted.total_amount,
            "repair request created"
        );
        Ok(RequestRecord::from_repair(inserted))
    }

    #[instrument(skip(self, payload), fields(user_id = %user_id, bicycle_id = payload.bicycle_id))]
    pub async fn create_rental(
        &self,
        user_id: Uuid,
        payload: CreateRentalRequest,
    ) -> Result<RequestRecord, ServiceError> {
        payload.validate()?;
        if payload.daily_rate <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "daily rate must be positive".to_string(),
            ));
        }

        let subtotal = payload.daily_rate * Decimal::from(payload.duration_days);
        let categories = vec![payload.bicycle_category.clone()];
        let (total, coupon_code) = self
            .discounted_total(
                RequestType::Rental,
                payload.coupon_code.as_deref(),
                &categories,
                subtotal,
            )
            .await?;

        let model = rental_request::ActiveModel {
            user_id: Set(user_id),
            status: Set(RequestStatus::Pending),
            payment_method: Set(payload.payment_method),
            bicycle_id: Set(payload.bicycle_id),
            bicycle_category: Set(payload.bicycle_category),
            daily_rate: Set(payload.daily_rate),
            duration_days: Set(payload.duration_days),
            total_amount: Set(total),
            coupon_code: Set(coupon_code),
            rejection_note: Set(None),
            expires_at: Set(Some(Utc::now() + self.request_expiry)),
            ..Default::default()
        };
        let inserted = model.insert(self.db.as_ref()).await?;

        metrics::increment_counter(metrics::names::REQUESTS_CREATED);
        self.emit(Event::RequestCreated {
            request_type: RequestType::Rental,
            request_id: inserted.id,
            user_id,
        })
        .await;
        info!(
            request_id = inserted.id,
            total = %inserted.total_amount,
            "rental request created"
        );
        Ok(RequestRecord::from_rental(inserted))
    }

    async fn fetch_raw(
        &self,
        request_type: RequestType,
        id: i64,
    ) -> Result<Option<RequestRecord>, ServiceError> {
        Ok(match request_type {
            RequestType::Repair => RepairRequest::find_by_id(id)
                .one(self.db.as_ref())
                .await?
                .map(RequestRecord::from_repair),
            RequestType::Rental => RentalRequest::find_by_id(id)
                .one(self.db.as_ref())
                .await?
                .map(RequestRecord::from_rental),
        })
    }

    /// Lazy expiry: a `pending` record past its deadline is moved to
    /// `expired` before being returned, so an overdue request is never
    /// observed as `pending`. Losing the conditional write to a concurrent
    /// transition is fine; the stored row wins.
    async fn expire_if_overdue(&self, record: RequestRecord) -> Result<RequestRecord, ServiceError> {
        let now = Utc::now();
        let overdue = record.status == RequestStatus::Pending
            && record.expires_at.map_or(false, |deadline| now > deadline);
        if !overdue {
            return Ok(record);
        }

        if apply_transition(
            self.db.as_ref(),
            record.request_type,
            record.id,
            RequestStatus::Pending,
            RequestStatus::Expired,
            None,
        )
        .await?
        {
            metrics::increment_counter(metrics::names::REQUESTS_EXPIRED);
            self.emit(Event::RequestStatusChanged {
                request_type: record.request_type,
                request_id: record.id,
                old_status: RequestStatus::Pending,
                new_status: RequestStatus::Expired,
            })
            .await;
            info!(
                request_type = %record.request_type,
                request_id = record.id,
                "request expired"
            );
            let mut record = record;
            record.status = RequestStatus::Expired;
            record.expires_at = None;
            record.updated_at = now;
            Ok(record)
        } else {
            self.fetch_raw(record.request_type, record.id)
                .await?
                .ok_or_else(|| not_found(record.request_type, record.id))
        }
    }

    pub async fn get_request(
        &self,
        request_type: RequestType,
        id: i64,
    ) -> Result<RequestRecord, ServiceError> {
        let record = self
            .fetch_raw(request_type, id)
            .await?
            .ok_or_else(|| not_found(request_type, id))?;
        self.expire_if_overdue(record).await
    }

    /// Fetch one request enforcing ownership. Non-owners get `NotFound`, not
    /// `Forbidden`, so request ids cannot be probed.
    pub async fn get_owned_request(
        &self,
        user_id: Uuid,
        request_type: RequestType,
        id: i64,
    ) -> Result<RequestRecord, ServiceError> {
        let record = self.get_request(request_type, id).await?;
        if record.user_id != user_id {
            return Err(not_found(request_type, id));
        }
        Ok(record)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RequestRecord>, ServiceError> {
        let repairs = RepairRequest::find()
            .filter(repair_request::Column::UserId.eq(user_id))
            .order_by_desc(repair_request::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        let rentals = RentalRequest::find()
            .filter(rental_request::Column::UserId.eq(user_id))
            .order_by_desc(rental_request::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        let mut records = Vec::with_capacity(repairs.len() + rentals.len());
        for model in repairs {
            records.push(self.expire_if_overdue(RequestRecord::from_repair(model)).await?);
        }
        for model in rentals {
            records.push(self.expire_if_overdue(RequestRecord::from_rental(model)).await?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// CAS the transition, mapping a zero-row update to `IllegalTransition`
    /// against the row's current status. `reported_target` keeps the error
    /// readable when the physical destination differs from the operator's
    /// verb (approval of an online request writes `waiting_payment`).
    async fn transition_or_report(
        &self,
        request_type: RequestType,
        id: i64,
        from: RequestStatus,
        to: RequestStatus,
        note: Option<String>,
        reported_target: RequestStatus,
    ) -> Result<RequestRecord, ServiceError> {
        if !apply_transition(self.db.as_ref(), request_type, id, from, to, note).await? {
            let current = current_status(self.db.as_ref(), request_type, id)
                .await?
                .ok_or_else(|| not_found(request_type, id))?;
            return Err(ServiceError::IllegalTransition {
                from: current.to_string(),
                to: reported_target.to_string(),
            });
        }
        self.emit(Event::RequestStatusChanged {
            request_type,
            request_id: id,
            old_status: from,
            new_status: to,
        })
        .await;
        self.get_request(request_type, id).await
    }

    #[instrument(skip(self), fields(request_type = %request_type, request_id = id))]
    pub async fn approve(
        &self,
        request_type: RequestType,
        id: i64,
    ) -> Result<RequestRecord, ServiceError> {
        let record = self.get_request(request_type, id).await?;
        if record.status != RequestStatus::Pending {
            return Err(ServiceError::IllegalTransition {
                from: record.status.to_string(),
                to: RequestStatus::Approved.to_string(),
            });
        }

        let destination = approval_destination(request_type, record.payment_method);
        let updated = self
            .transition_or_report(
                request_type,
                id,
                RequestStatus::Pending,
                destination,
                None,
                RequestStatus::Approved,
            )
            .await?;
        info!(destination = %destination, "request approved");
        Ok(updated)
    }

    #[instrument(skip(self, note), fields(request_type = %request_type, request_id = id))]
    pub async fn reject(
        &self,
        request_type: RequestType,
        id: i64,
        note: &str,
    ) -> Result<RequestRecord, ServiceError> {
        let note = note.trim();
        if note.is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection note is required".to_string(),
            ));
        }

        let record = self.get_request(request_type, id).await?;
        if record.status != RequestStatus::Pending {
            return Err(ServiceError::IllegalTransition {
                from: record.status.to_string(),
                to: RequestStatus::Rejected.to_string(),
            });
        }

        let updated = self
            .transition_or_report(
                request_type,
                id,
                RequestStatus::Pending,
                RequestStatus::Rejected,
                Some(note.to_string()),
                RequestStatus::Rejected,
            )
            .await?;
        info!("request rejected");
        Ok(updated)
    }

    /// Operator marks a rental as handed over: `arranging_delivery →
    /// active_rental`. Repairs never pass through these states.
    #[instrument(skip(self), fields(request_type = %request_type, request_id = id))]
    pub async fn start_rental(
        &self,
        request_type: RequestType,
        id: i64,
    ) -> Result<RequestRecord, ServiceError> {
        let record = self.get_request(request_type, id).await?;
        if record.status != RequestStatus::ArrangingDelivery
            || !is_legal_transition(
                request_type,
                record.payment_method,
                RequestStatus::ArrangingDelivery,
                RequestStatus::ActiveRental,
            )
        {
            return Err(ServiceError::IllegalTransition {
                from: record.status.to_string(),
                to: RequestStatus::ActiveRental.to_string(),
            });
        }

        let updated = self
            .transition_or_report(
                request_type,
                id,
                RequestStatus::ArrangingDelivery,
                RequestStatus::ActiveRental,
                None,
                RequestStatus::ActiveRental,
            )
            .await?;
        info!("rental started");
        Ok(updated)
    }

    #[instrument(skip(self), fields(request_type = %request_type, request_id = id))]
    pub async fn complete(
        &self,
        request_type: RequestType,
        id: i64,
    ) -> Result<RequestRecord, ServiceError> {
        let from = completion_source(request_type);
        let record = self.get_request(request_type, id).await?;
        if record.status != from {
            return Err(ServiceError::IllegalTransition {
                from: record.status.to_string(),
                to: RequestStatus::Completed.to_string(),
            });
        }

        let updated = self
            .transition_or_report(
                request_type,
                id,
                from,
                RequestStatus::Completed,
                None,
                RequestStatus::Completed,
            )
            .await?;
        info!("request completed");
        Ok(updated)
    }
}
