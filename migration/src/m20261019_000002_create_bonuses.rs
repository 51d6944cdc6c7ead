use sea_orm_migration::prelude::*;

use super::m20261019_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Bonuses::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Bonuses::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Bonuses::UserId).integer().not_null())
          .col(ColumnDef::new(Bonuses::Amount).big_integer().not_null())
          .col(
            ColumnDef::new(Bonuses::Kind)
              .string()
              .not_null()
              .default("manual"),
          )
          .col(ColumnDef::new(Bonuses::Description).string().not_null())
          .col(ColumnDef::new(Bonuses::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_bonuses_user")
              .from(Bonuses::Table, Bonuses::UserId)
              .to(Users::Table, Users::Id)
              .on_delete(ForeignKeyAction::Restrict),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_bonuses_user")
          .table(Bonuses::Table)
          .col(Bonuses::UserId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Bonuses::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Bonuses {
  Table,
  Id,
  UserId,
  Amount,
  Kind,
  Description,
  CreatedAt,
}
