use sea_orm::sea_query::Expr;
use teloxide::utils::html;

use crate::{
  cache::keys,
  entity::{TourStatus, tour_request, user},
  notify,
  prelude::*,
  sv::{Credit, Ctx, Ledger, Referral, User},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
  Completed { request: tour_request::Model, reward: Option<Credit> },
  AlreadyCompleted(tour_request::Model),
}

pub struct Tour<'a> {
  ctx: Ctx<'a>,
}

impl<'a> Tour<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self { ctx }
  }

  pub async fn submit(
    &self,
    user: &user::Model,
    description: &str,
  ) -> Result<tour_request::Model> {
    let description = description.trim();
    if description.is_empty() {
      return Err(Error::InvalidArgs(
        "Describe the tour you are looking for.".into(),
      ));
    }

    let now = Utc::now().naive_utc();
    let request = tour_request::ActiveModel {
      id: NotSet,
      user_id: Set(user.id),
      description: Set(description.to_string()),
      status: Set(TourStatus::New),
      created_at: Set(now),
      updated_at: Set(now),
    }
    .insert(self.ctx.db)
    .await?;

    info!("Tour request #{} submitted by user #{}", request.id, user.id);
    self
      .ctx
      .cached()
      .put(
        &keys::tour_request(request.id),
        &request,
        self.ctx.config.cache.request_ttl,
      )
      .await;

    let admins = User::new(self.ctx).admins().await.unwrap_or_else(|err| {
      warn!("Cannot load admins for tour request #{}: {err}", request.id);
      Vec::new()
    });

    let text = format!(
      "🔔 <b>New tour request #{}</b>\n\n👤 {} (user #{})\n📝 {}\n📅 {}",
      request.id,
      html::escape(&user.phone),
      user.id,
      html::escape(&request.description),
      utils::format_date(request.created_at),
    );
    for admin in admins {
      notify::deliver(self.ctx.notifier, admin, &text).await;
    }

    Ok(request)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<tour_request::Model>> {
    let db = self.ctx.db;
    self
      .ctx
      .cached()
      .load(&keys::tour_request(id), self.ctx.config.cache.request_ttl, || {
        async move { Ok(tour_request::Entity::find_by_id(id).one(db).await?) }
      })
      .await
  }

  /// Oldest first, with the requester when it still exists.
  pub async fn pending(
    &self,
    limit: u64,
  ) -> Result<Vec<(tour_request::Model, Option<user::Model>)>> {
    let requests = tour_request::Entity::find()
      .filter(tour_request::Column::Status.eq(TourStatus::New))
      .order_by_asc(tour_request::Column::CreatedAt)
      .order_by_asc(tour_request::Column::Id)
      .limit(limit)
      .find_also_related(user::Entity)
      .all(self.ctx.db)
      .await?;
    Ok(requests)
  }

  /// Marks the request done and pays the booking bonus in the same
  /// transaction. Only the call that flips `new` to `end` pays.
  pub async fn complete(&self, id: i32) -> Result<Completion> {
    let txn = self.ctx.db.begin().await?;

    let flipped = tour_request::Entity::update_many()
      .col_expr(tour_request::Column::Status, Expr::value(TourStatus::End))
      .col_expr(
        tour_request::Column::UpdatedAt,
        Expr::value(Utc::now().naive_utc()),
      )
      .filter(tour_request::Column::Id.eq(id))
      .filter(tour_request::Column::Status.eq(TourStatus::New))
      .exec(&txn)
      .await?
      .rows_affected;

    let request = tour_request::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::RequestNotFound)?;

    if flipped == 0 {
      return Ok(Completion::AlreadyCompleted(request));
    }

    let customer = user::Entity::find_by_id(request.user_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;
    let reward = Referral::new(self.ctx)
      .reward_booking(&txn, &customer, request.id)
      .await?;

    txn.commit().await?;
    info!("Tour request #{id} completed");

    self
      .ctx
      .cached()
      .put(
        &keys::tour_request(id),
        &request,
        self.ctx.config.cache.request_ttl,
      )
      .await;
    if let Some(credit) = &reward {
      Ledger::new(self.ctx).settle(std::slice::from_ref(credit)).await;
    }
    notify::deliver(
      self.ctx.notifier,
      customer.tg_user_id,
      &format!("✅ Your tour request #{id} has been completed."),
    )
    .await;

    Ok(Completion::Completed { request, reward })
  }
}
