use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CouponScope, DiscountType};

/// A named discount rule. Read-only to the lifecycle/payment core; rows are
/// managed out of band. `applicable_categories` is an optional JSON list of
/// item-category tags (null means every category qualifies).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub applies_to: CouponScope,
    pub min_amount: Option<Decimal>,
    pub applicable_categories: Option<Json>,
    pub active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
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
            if let ActiveValue::NotSet = model.id {
                model.id = Set(Uuid::new_v4());
            }
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

impl Model {
    /// Category tags this coupon is restricted to, if any.
    pub fn categories(&self) -> Option<Vec<String>> {
        self.applicable_categories.as_ref().map(|value| {
            value
                .as_array()
                .map(|tags| {
                    tags.iter()
                        .filter_map(|tag| tag.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}
