use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::user;

/// What a ledger record was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BonusKind {
  #[sea_orm(string_value = "level_1")]
  Level1,
  #[sea_orm(string_value = "level_2")]
  Level2,
  #[sea_orm(string_value = "level_3")]
  Level3,
  /// Direct referrer of a customer whose tour booking completed
  #[sea_orm(string_value = "booking")]
  Booking,
  /// Admin grant or deduction
  #[sea_orm(string_value = "manual")]
  Manual,
}

impl BonusKind {
  pub const LEVELS: [BonusKind; 3] =
    [BonusKind::Level1, BonusKind::Level2, BonusKind::Level3];

  pub fn level(level: u8) -> Option<Self> {
    match level {
      1 => Some(Self::Level1),
      2 => Some(Self::Level2),
      3 => Some(Self::Level3),
      _ => None,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::Level1 => "level 1",
      Self::Level2 => "level 2",
      Self::Level3 => "level 3",
      Self::Booking => "booking",
      Self::Manual => "manual",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bonuses")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub user_id: i32,
  /// Signed, minor currency units
  pub amount: i64,
  pub kind: BonusKind,
  pub description: String,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::UserId",
    to = "user::Column::Id"
  )]
  User,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::User.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
