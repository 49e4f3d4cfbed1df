use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{PaymentMethod, RequestStatus};

/// A user-submitted rental booking. `total_amount` is `daily_rate ×
/// duration_days` minus any coupon discount, fixed at creation. The bicycle
/// catalog itself is an external collaborator; only the reference and the
/// pricing inputs are stored here.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rental_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: Uuid,
    pub status: RequestStatus,
    pub payment_method: PaymentMethod,
    pub bicycle_id: i64,
    pub bicycle_category: String,
    pub daily_rate: Decimal,
    pub duration_days: i32,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub rejection_note: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
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
