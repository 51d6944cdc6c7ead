use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{bonus, tour_request};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  /// Telegram id, the external identity
  #[sea_orm(unique)]
  pub tg_user_id: i64,
  #[sea_orm(unique)]
  pub phone: String,
  #[sea_orm(unique)]
  pub referral_code: String,
  pub referred_by: Option<i32>,
  /// Minor currency units
  pub balance: i64,
  pub is_admin: bool,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "Entity",
    from = "Column::ReferredBy",
    to = "Column::Id",
    on_delete = "SetNull"
  )]
  Referrer,
  #[sea_orm(has_many = "bonus::Entity")]
  Bonuses,
  #[sea_orm(has_many = "tour_request::Entity")]
  TourRequests,
}

impl Related<bonus::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Bonuses.def()
  }
}

impl Related<tour_request::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::TourRequests.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
