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
          .table(TourRequests::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(TourRequests::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(TourRequests::UserId).integer().not_null())
          .col(ColumnDef::new(TourRequests::Description).text().not_null())
          .col(
            ColumnDef::new(TourRequests::Status)
              .string()
              .not_null()
              .default("new"),
          )
          .col(ColumnDef::new(TourRequests::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(TourRequests::UpdatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_tour_requests_user")
              .from(TourRequests::Table, TourRequests::UserId)
              .to(Users::Table, Users::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_tour_requests_status")
          .table(TourRequests::Table)
          .col(TourRequests::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(TourRequests::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
pub enum TourRequests {
  Table,
  Id,
  UserId,
  Description,
  Status,
  CreatedAt,
  UpdatedAt,
}
