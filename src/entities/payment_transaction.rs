use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{RequestType, TransactionStatus};

/// One payment-gateway order and its resolution. `request_id` is nullable to
/// permit a pre-request "floating" order. `payment_details` is an append-only
/// audit log; entries are added by [`append_detail`] and never rewritten.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_type: RequestType,
    pub request_id: Option<i64>,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    #[sea_orm(unique)]
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub payment_details: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr> {
        let mut model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = model.created_at {
                model.created_at = Set(now);
            }
        }
        if let ActiveValue::NotSet = model.updated_at {
            model.updated_at = Set(now);
        }
        Ok(model)
    }
}

/// Tagged audit entries accumulated in `payment_details`. The set of tags is
/// closed; forensics tooling relies on the `event` discriminator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentDetailEntry {
    OrderCreated {
        order: serde_json::Value,
        at: DateTime<Utc>,
    },
    VerificationFailed {
        reason: String,
        at: DateTime<Utc>,
    },
    VerificationSucceeded {
        payment: serde_json::Value,
        at: DateTime<Utc>,
    },
}

impl PaymentDetailEntry {
    pub fn order_created(order: serde_json::Value) -> Self {
        PaymentDetailEntry::OrderCreated {
            order,
            at: Utc::now(),
        }
    }

    pub fn verification_failed(reason: impl Into<String>) -> Self {
        PaymentDetailEntry::VerificationFailed {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn verification_succeeded(payment: serde_json::Value) -> Self {
        PaymentDetailEntry::VerificationSucceeded {
            payment,
            at: Utc::now(),
        }
    }
}

/// Returns `details` with `entry` appended. Non-array history (including the
/// initial `Json::Null` of a fresh row) is wrapped rather than discarded so
/// the log only ever grows.
pub fn append_detail(details: &Json, entry: PaymentDetailEntry) -> Json {
    let entry_value = serde_json::to_value(&entry).unwrap_or_else(|_| {
        serde_json::json!({ "event": "unserializable_entry", "at": Utc::now().to_rfc3339() })
    });
    let mut log = match details {
        Json::Array(entries) => entries.clone(),
        Json::Null => Vec::new(),
        other => vec![other.clone()],
    };
    log.push(entry_value);
    Json::Array(log)
}

/// Seeds the audit log for a freshly minted transaction.
pub fn initial_details(entry: PaymentDetailEntry) -> Json {
    append_detail(&Json::Null, entry)
}
