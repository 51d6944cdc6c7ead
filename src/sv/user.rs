use crate::{
  cache::keys,
  entity::user,
  prelude::*,
  sv::Ctx,
};

pub struct User<'a> {
  ctx: Ctx<'a>,
}

impl<'a> User<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self { ctx }
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<user::Model>> {
    Ok(user::Entity::find_by_id(id).one(self.ctx.db).await?)
  }

  /// Cached snapshot, fine for display and routing. Money paths re-read
  /// the row inside their own transaction.
  pub async fn by_tg(&self, tg_user_id: i64) -> Result<Option<user::Model>> {
    let db = self.ctx.db;
    self
      .ctx
      .cached()
      .load(&keys::user(tg_user_id), self.ctx.config.cache.user_ttl, || {
        async move {
          let user = user::Entity::find()
            .filter(user::Column::TgUserId.eq(tg_user_id))
            .one(db)
            .await?;
          Ok(user)
        }
      })
      .await
  }

  pub async fn by_phone(&self, phone: &str) -> Result<Option<user::Model>> {
    let phone = utils::normalize_phone(phone);
    let user = user::Entity::find()
      .filter(user::Column::Phone.eq(phone))
      .one(self.ctx.db)
      .await?;
    Ok(user)
  }

  /// Malformed and unknown codes both yield `None`.
  pub async fn by_referral_code(
    &self,
    code: &str,
  ) -> Result<Option<user::Model>> {
    let Some(code) = utils::normalize_code(code) else {
      return Ok(None);
    };

    let db = self.ctx.db;
    let owner: Option<i32> = self
      .ctx
      .cached()
      .load(&keys::referral(&code), self.ctx.config.cache.code_ttl, || {
        async move {
          let id = user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::ReferralCode.eq(code.as_str()))
            .into_tuple::<i32>()
            .one(db)
            .await?;
          Ok(id)
        }
      })
      .await?;

    match owner {
      Some(id) => self.by_id(id).await,
      None => Ok(None),
    }
  }

  /// Admin lookup: internal id first, then phone number.
  pub async fn resolve(&self, query: &str) -> Result<user::Model> {
    let query = query.trim();
    if query.is_empty() {
      return Err(Error::InvalidArgs(
        "Specify a user id or phone number.".into(),
      ));
    }

    if let Ok(id) = query.parse::<i32>()
      && let Some(user) = self.by_id(id).await?
    {
      return Ok(user);
    }

    self.by_phone(query).await?.ok_or(Error::UserNotFound)
  }

  pub async fn set_admin(
    &self,
    user_id: i32,
    is_admin: bool,
  ) -> Result<user::Model> {
    let user = self.by_id(user_id).await?.ok_or(Error::UserNotFound)?;

    let user = user::ActiveModel { is_admin: Set(is_admin), ..user.into() }
      .update(self.ctx.db)
      .await?;

    self.ctx.cached().invalidate(&keys::user(user.tg_user_id)).await;
    info!("User #{} admin flag set to {is_admin}", user.id);
    Ok(user)
  }

  /// Uses the cached snapshot, good enough to pick a menu.
  pub async fn is_admin(&self, tg_user_id: i64) -> Result<bool> {
    if self.ctx.config.admins.contains(&tg_user_id) {
      return Ok(true);
    }
    Ok(self.by_tg(tg_user_id).await?.is_some_and(|user| user.is_admin))
  }

  /// Reads the stored flag. Gate anything that moves money with this.
  pub async fn verify_admin(&self, tg_user_id: i64) -> Result<()> {
    if self.ctx.config.admins.contains(&tg_user_id) {
      return Ok(());
    }

    let stored = user::Entity::find()
      .filter(user::Column::TgUserId.eq(tg_user_id))
      .filter(user::Column::IsAdmin.eq(true))
      .count(self.ctx.db)
      .await?;

    if stored == 0 {
      return Err(Error::Unauthorized);
    }
    Ok(())
  }

  /// Telegram ids of every admin, configured or stored.
  pub async fn admins(&self) -> Result<Vec<i64>> {
    let mut ids: Vec<i64> = user::Entity::find()
      .select_only()
      .column(user::Column::TgUserId)
      .filter(user::Column::IsAdmin.eq(true))
      .into_tuple()
      .all(self.ctx.db)
      .await?;

    ids.extend(self.ctx.config.admins.iter().copied());
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
  }

  pub async fn list(&self, limit: u64) -> Result<Vec<user::Model>> {
    let users = user::Entity::find()
      .order_by_desc(user::Column::CreatedAt)
      .order_by_desc(user::Column::Id)
      .limit(limit)
      .all(self.ctx.db)
      .await?;
    Ok(users)
  }

  pub async fn count(&self) -> Result<u64> {
    Ok(user::Entity::find().count(self.ctx.db).await?)
  }

  pub fn referral_link(&self, user: &user::Model) -> String {
    format!(
      "https://t.me/{}?start={}",
      self.ctx.config.bot_username, user.referral_code
    )
  }
}
