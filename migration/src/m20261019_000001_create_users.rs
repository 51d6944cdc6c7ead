use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Users::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Users::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(
            ColumnDef::new(Users::TgUserId)
              .big_integer()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(Users::Phone).string().not_null().unique_key())
          .col(
            ColumnDef::new(Users::ReferralCode)
              .string_len(8)
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(Users::ReferredBy).integer().null())
          .col(
            ColumnDef::new(Users::Balance)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Users::IsAdmin).boolean().not_null().default(false))
          .col(ColumnDef::new(Users::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_users_referred_by")
              .from(Users::Table, Users::ReferredBy)
              .to(Users::Table, Users::Id)
              .on_delete(ForeignKeyAction::SetNull),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_users_referred_by")
          .table(Users::Table)
          .col(Users::ReferredBy)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Users::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Users {
  Table,
  Id,
  TgUserId,
  Phone,
  ReferralCode,
  ReferredBy,
  Balance,
  IsAdmin,
  CreatedAt,
}
