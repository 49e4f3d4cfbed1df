use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::{PaymentMethod, RequestStatus};

/// A user-submitted repair booking. `total_amount` is computed once at
/// creation from `service_items` minus any coupon discount and is immutable
/// afterwards. `expires_at` is set while the request is `pending` and cleared
/// on every transition out of it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: Uuid,
    pub status: RequestStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    /// Line items the total was computed from: `[{name, category, price}]`.
    pub service_items: Json,
    pub rejection_note: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One repair line item (a service from the shop menu).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceItem {
    pub name: String,
    pub category: String,
    pub price: Decimal,
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
