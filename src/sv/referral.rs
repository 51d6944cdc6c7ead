//! Registration and multi-level attribution.
//!
//! A new account and every referral payout it triggers are committed in one
//! transaction. Cache writes and notifications only happen after the commit.

use sea_orm::{DbErr, SqlErr};

use crate::{
  cache::keys,
  config::MAX_LEVELS,
  entity::{BonusKind, user},
  prelude::*,
  sv::{Credit, Ctx, Ledger},
};

/// Attempts at drawing an unused referral code per registration.
pub const CODE_ATTEMPTS: usize = 8;
/// Whole-registration retries after losing an insert race on the code.
const REGISTER_ATTEMPTS: usize = 3;

/// A referrer above the new user, `level` 1 being the direct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upline {
  pub level: u8,
  pub user: user::Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
  Created { user: user::Model, credits: Vec<Credit> },
  Existing(user::Model),
}

impl Registration {
  pub fn user(&self) -> &user::Model {
    match self {
      Registration::Created { user, .. } | Registration::Existing(user) => user,
    }
  }
}

/// Which unique column an insert tripped over.
#[derive(Debug, PartialEq, Eq)]
enum Taken {
  Identity,
  Phone,
  Code,
}

fn taken(err: &DbErr) -> Option<Taken> {
  match err.sql_err()? {
    SqlErr::UniqueConstraintViolation(msg) => {
      if msg.contains("referral_code") {
        Some(Taken::Code)
      } else if msg.contains("tg_user_id") {
        Some(Taken::Identity)
      } else if msg.contains("phone") {
        Some(Taken::Phone)
      } else {
        None
      }
    }
    _ => None,
  }
}

/// Walks `referred_by` links upward starting at the direct referrer.
/// Stops at `depth` levels, at a user without a referrer, or on a loop.
pub async fn upline<C: ConnectionTrait>(
  conn: &C,
  referrer: user::Model,
  depth: usize,
) -> Result<Vec<Upline>> {
  let mut chain: Vec<Upline> = Vec::with_capacity(depth);
  let mut next = Some(referrer);

  while let Some(user) = next.take() {
    if chain.len() >= depth {
      break;
    }

    let parent = user.referred_by.filter(|&id| {
      id != user.id && !chain.iter().any(|up| up.user.id == id)
    });
    chain.push(Upline { level: chain.len() as u8 + 1, user });

    if chain.len() < depth
      && let Some(parent) = parent
    {
      next = user::Entity::find_by_id(parent).one(conn).await?;
    }
  }

  Ok(chain)
}

/// Pairs each upline level with its rate. Levels without a rate earn
/// nothing.
pub fn payouts(upline: &[Upline], rates: &[i64], newcomer: &str) -> Vec<Credit> {
  upline
    .iter()
    .zip(rates)
    .filter(|(_, amount)| **amount > 0)
    .filter_map(|(up, &amount)| {
      let kind = BonusKind::level(up.level)?;
      Some(Credit {
        user_id: up.user.id,
        tg_user_id: up.user.tg_user_id,
        amount,
        kind,
        description: format!(
          "Referral bonus, level {}: {newcomer} joined",
          up.level
        ),
      })
    })
    .collect()
}

pub struct Referral<'a> {
  ctx: Ctx<'a>,
}

impl<'a> Referral<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self { ctx }
  }

  /// Creates the account for `tg_user_id` and pays its upline. A known
  /// identity returns the stored account without touching any balance.
  /// Unknown or malformed codes register the user without a referrer.
  pub async fn register(
    &self,
    tg_user_id: i64,
    phone: &str,
    code: Option<&str>,
  ) -> Result<Registration> {
    self.register_with(tg_user_id, phone, code, utils::referral_code).await
  }

  pub(crate) async fn register_with(
    &self,
    tg_user_id: i64,
    phone: &str,
    code: Option<&str>,
    mut generate: impl FnMut() -> String + Send,
  ) -> Result<Registration> {
    let phone = utils::normalize_phone(phone);
    let code = code.and_then(utils::normalize_code);

    for attempt in 1..=REGISTER_ATTEMPTS {
      let err = match self
        .try_register(tg_user_id, &phone, code.as_deref(), &mut generate)
        .await
      {
        Ok(registration) => {
          if let Registration::Created { user, credits } = &registration {
            self.publish(user, credits).await;
          }
          return Ok(registration);
        }
        Err(Error::Db(err)) => err,
        Err(err) => return Err(err),
      };

      match taken(&err) {
        Some(Taken::Code) => {
          warn!(
            "Referral code collided on insert ({attempt}/{REGISTER_ATTEMPTS})"
          );
        }
        Some(Taken::Identity) => {
          let user = user::Entity::find()
            .filter(user::Column::TgUserId.eq(tg_user_id))
            .one(self.ctx.db)
            .await?;
          return user.map(Registration::Existing).ok_or(Error::Db(err));
        }
        Some(Taken::Phone) => return Err(Error::PhoneTaken),
        None => return Err(Error::Db(err)),
      }
    }

    Err(Error::CodeSpace)
  }

  async fn try_register(
    &self,
    tg_user_id: i64,
    phone: &str,
    code: Option<&str>,
    generate: &mut (impl FnMut() -> String + Send),
  ) -> Result<Registration> {
    let txn = self.ctx.db.begin().await?;

    if let Some(user) = user::Entity::find()
      .filter(user::Column::TgUserId.eq(tg_user_id))
      .one(&txn)
      .await?
    {
      return Ok(Registration::Existing(user));
    }

    let phone_owners = user::Entity::find()
      .filter(user::Column::Phone.eq(phone))
      .count(&txn)
      .await?;
    if phone_owners > 0 {
      return Err(Error::PhoneTaken);
    }

    let referrer = match code {
      Some(code) => {
        user::Entity::find()
          .filter(user::Column::ReferralCode.eq(code))
          .one(&txn)
          .await?
      }
      None => None,
    };
    if code.is_some() && referrer.is_none() {
      debug!("Unknown referral code {code:?}, registering without referrer");
    }

    let rates = &self.ctx.config.bonus.levels;
    let upline = match referrer {
      Some(referrer) => {
        upline(&txn, referrer, rates.len().min(MAX_LEVELS)).await?
      }
      None => Vec::new(),
    };

    let referral_code = fresh_code(&txn, generate).await?;

    let user = user::ActiveModel {
      id: NotSet,
      tg_user_id: Set(tg_user_id),
      phone: Set(phone.to_string()),
      referral_code: Set(referral_code),
      referred_by: Set(upline.first().map(|up| up.user.id)),
      balance: Set(0),
      is_admin: Set(false),
      created_at: Set(Utc::now().naive_utc()),
    }
    .insert(&txn)
    .await?;

    let credits = payouts(&upline, rates, &utils::mask_phone(phone));
    for credit in &credits {
      Ledger::post(&txn, credit).await?;
    }

    txn.commit().await?;
    info!(
      "Registered user #{} (tg {tg_user_id}), {} referral payout(s)",
      user.id,
      credits.len()
    );

    Ok(Registration::Created { user, credits })
  }

  async fn publish(&self, user: &user::Model, credits: &[Credit]) {
    let cached = self.ctx.cached();
    let ttl = &self.ctx.config.cache;
    cached.put(&keys::user(user.tg_user_id), user, ttl.user_ttl).await;
    cached
      .put(&keys::referral(&user.referral_code), &user.id, ttl.code_ttl)
      .await;

    Ledger::new(self.ctx).settle(credits).await;
  }

  /// Pays the booking bonus to the direct referrer of `customer` on `conn`.
  pub(crate) async fn reward_booking<C: ConnectionTrait>(
    &self,
    conn: &C,
    customer: &user::Model,
    request_id: i32,
  ) -> Result<Option<Credit>> {
    let amount = self.ctx.config.bonus.booking;
    let Some(referrer_id) = customer.referred_by else {
      return Ok(None);
    };
    if amount <= 0 {
      return Ok(None);
    }

    let Some(referrer) = user::Entity::find_by_id(referrer_id).one(conn).await?
    else {
      return Ok(None);
    };

    let credit = Credit {
      user_id: referrer.id,
      tg_user_id: referrer.tg_user_id,
      amount,
      kind: BonusKind::Booking,
      description: format!(
        "Booking bonus: tour request #{request_id} by {}",
        utils::mask_phone(&customer.phone)
      ),
    };
    Ledger::post(conn, &credit).await?;
    Ok(Some(credit))
  }
}

/// Draws codes until one is unused. The unique index still has the final
/// word, see [`Referral::register`].
pub(crate) async fn fresh_code<C: ConnectionTrait>(
  conn: &C,
  generate: &mut (impl FnMut() -> String + Send),
) -> Result<String> {
  for _ in 0..CODE_ATTEMPTS {
    let code = generate();
    let used = user::Entity::find()
      .filter(user::Column::ReferralCode.eq(code.as_str()))
      .count(conn)
      .await?;
    if used == 0 {
      return Ok(code);
    }
    warn!("Referral code {code} is taken, drawing another");
  }
  Err(Error::CodeSpace)
}

#[cfg(test)]
mod tests {
  use futures::future::join_all;

  use super::*;
  use crate::{
    cache::Cache,
    entity::bonus,
    sv::testing::{Harness, phone},
  };

  async fn bonus_count(h: &Harness) -> u64 {
    bonus::Entity::find().count(&h.db).await.unwrap()
  }

  #[tokio::test]
  async fn test_three_level_chain() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    let c = h.register(3, Some(&b.referral_code)).await;

    let before = bonus_count(&h).await;
    let Registration::Created { user: d, credits } = h
      .sv()
      .referral
      .register(4, &phone(4), Some(&c.referral_code))
      .await
      .unwrap()
    else {
      panic!("expected a new account");
    };

    assert_eq!(d.referred_by, Some(c.id));
    assert_eq!(bonus_count(&h).await - before, 3);

    let paid: Vec<(i32, i64, BonusKind)> =
      credits.iter().map(|c| (c.user_id, c.amount, c.kind)).collect();
    assert_eq!(
      paid,
      vec![
        (c.id, 10_000, BonusKind::Level1),
        (b.id, 5_000, BonusKind::Level2),
        (a.id, 2_500, BonusKind::Level3),
      ]
    );

    let sv = h.sv();
    // a: b joined (L1), c joined (L2), d joined (L3)
    assert_eq!(sv.ledger.audit(a.id).await.unwrap().balance, 17_500);
    assert_eq!(sv.ledger.audit(b.id).await.unwrap().balance, 15_000);
    assert_eq!(sv.ledger.audit(c.id).await.unwrap().balance, 10_000);
    assert_eq!(sv.ledger.audit(d.id).await.unwrap().balance, 0);

    for user in [&a, &b, &c, &d] {
      assert!(sv.ledger.audit(user.id).await.unwrap().is_consistent());
    }
  }

  #[tokio::test]
  async fn test_payouts_stop_at_three_levels() {
    let h = Harness::new().await;
    let mut code: Option<String> = None;
    let mut chain = Vec::new();
    for tg in 1..=5 {
      let user = h.register(tg, code.as_deref()).await;
      code = Some(user.referral_code.clone());
      chain.push(user);
    }

    let sv = h.sv();
    // chain[0] only earns from tg 2, 3 and 4, never from tg 5
    assert_eq!(sv.ledger.audit(chain[0].id).await.unwrap().balance, 17_500);
    assert_eq!(sv.ledger.audit(chain[1].id).await.unwrap().balance, 17_500);

    let walked = upline(&h.db, chain[4].clone(), MAX_LEVELS).await.unwrap();
    let ids: Vec<(u8, i32)> =
      walked.iter().map(|up| (up.level, up.user.id)).collect();
    assert_eq!(
      ids,
      vec![(1, chain[4].id), (2, chain[3].id), (3, chain[2].id)]
    );
  }

  #[tokio::test]
  async fn test_invalid_codes_register_silently() {
    let h = Harness::new().await;
    h.register(1, None).await;

    for (tg, code) in [(2, "ZZZZZZZZ"), (3, "bad!"), (4, "")] {
      let user = h.register(tg, Some(code)).await;
      assert_eq!(user.referred_by, None);
    }
    assert_eq!(bonus_count(&h).await, 0);
  }

  #[tokio::test]
  async fn test_repeat_registration_is_idempotent() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    let before = bonus_count(&h).await;

    let again = h
      .sv()
      .referral
      .register(2, &phone(2), Some(&a.referral_code))
      .await
      .unwrap();

    assert_eq!(again, Registration::Existing(b));
    assert_eq!(bonus_count(&h).await, before);
    assert_eq!(h.sv().ledger.audit(a.id).await.unwrap().balance, 10_000);
  }

  #[tokio::test]
  async fn test_concurrent_starts_create_one_account() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let sv = h.sv();

    let phone = phone(2);
    let attempts = (0..4)
      .map(|_| sv.referral.register(2, &phone, Some(&a.referral_code)));
    let results: Vec<Registration> =
      join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    let created = results
      .iter()
      .filter(|r| matches!(r, Registration::Created { .. }))
      .count();
    assert_eq!(created, 1);
    assert_eq!(sv.user.count().await.unwrap(), 2);
    assert_eq!(sv.ledger.audit(a.id).await.unwrap().balance, 10_000);
  }

  #[tokio::test]
  async fn test_code_is_reusable() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    h.register(2, Some(&a.referral_code)).await;
    h.register(3, Some(&a.referral_code.to_lowercase())).await;

    let sv = h.sv();
    assert_eq!(sv.ledger.audit(a.id).await.unwrap().balance, 20_000);
    assert_eq!(sv.ledger.history(a.id).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_phone_belongs_to_one_account() {
    let h = Harness::new().await;
    h.register(1, None).await;

    let result = h.sv().referral.register(2, &phone(1), None).await;
    assert!(matches!(result, Err(Error::PhoneTaken)));
    assert_eq!(h.sv().user.count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_referrers_are_notified() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    h.register(3, Some(&b.referral_code)).await;

    assert_eq!(h.notifier.sent_to(1).len(), 2);
    assert_eq!(h.notifier.sent_to(2).len(), 1);
    assert!(h.notifier.sent_to(3).is_empty());
    // phone numbers of newcomers are masked
    assert!(h.notifier.sent().iter().all(|(_, text)| !text.contains(&phone(3))));
  }

  #[tokio::test]
  async fn test_failed_notifications_keep_payouts() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    h.notifier.fail(true);

    let b = h.register(2, Some(&a.referral_code)).await;
    assert_eq!(b.referred_by, Some(a.id));
    assert_eq!(h.sv().ledger.audit(a.id).await.unwrap().balance, 10_000);
  }

  #[tokio::test]
  async fn test_registration_without_cache() {
    let h = Harness::broken().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;

    assert_eq!(b.referred_by, Some(a.id));
    assert_eq!(h.sv().ledger.balance(a.id).await.unwrap(), 10_000);
  }

  #[tokio::test]
  async fn test_registration_mirrors_warm_balance() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    assert_eq!(h.sv().ledger.balance(a.id).await.unwrap(), 0);

    h.register(2, Some(&a.referral_code)).await;

    let cached = h.memory.get(&keys::balance(a.id)).await.unwrap();
    assert_eq!(cached.as_deref(), Some("10000"));
    assert!(h.sv().ledger.audit(a.id).await.unwrap().is_consistent());
  }

  #[tokio::test]
  async fn test_code_collision_draws_again() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;

    let mut codes = vec![a.referral_code.clone(), "NEWCODE1".to_string()];
    codes.reverse();
    let registration = h
      .sv()
      .referral
      .register_with(2, &phone(2), None, move || codes.pop().unwrap())
      .await
      .unwrap();

    assert_eq!(registration.user().referral_code, "NEWCODE1");
  }

  #[tokio::test]
  async fn test_code_space_exhaustion() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;

    let code = a.referral_code.clone();
    let result = h
      .sv()
      .referral
      .register_with(2, &phone(2), None, move || code.clone())
      .await;

    assert!(matches!(result, Err(Error::CodeSpace)));
    assert_eq!(h.sv().user.count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_failed_payout_rolls_back_registration() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    let c = h.register(3, Some(&b.referral_code)).await;
    h.db
      .execute_unprepared(
        "CREATE TRIGGER fail_level_2 BEFORE INSERT ON bonuses \
         WHEN NEW.kind = 'level_2' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
      )
      .await
      .unwrap();

    let users = h.sv().user.count().await.unwrap();
    let records = bonus_count(&h).await;
    let mut before = Vec::new();
    for referrer in [&a, &b, &c] {
      before.push(h.sv().ledger.audit(referrer.id).await.unwrap().balance);
    }
    let result =
      h.sv().referral.register(4, &phone(4), Some(&c.referral_code)).await;

    assert!(matches!(result, Err(Error::Db(_))));
    assert_eq!(h.sv().user.count().await.unwrap(), users);
    assert_eq!(bonus_count(&h).await, records);
    let stored = user::Entity::find()
      .filter(user::Column::TgUserId.eq(4))
      .one(&h.db)
      .await
      .unwrap();
    assert_eq!(stored, None);
    for (referrer, before) in [&a, &b, &c].into_iter().zip(before) {
      let audit = h.sv().ledger.audit(referrer.id).await.unwrap();
      assert_eq!(audit.balance, before);
      assert!(audit.is_consistent());
    }
    assert!(h.notifier.sent_to(c.tg_user_id).is_empty());

    h.db.execute_unprepared("DROP TRIGGER fail_level_2").await.unwrap();
    let retried =
      h.sv().referral.register(4, &phone(4), Some(&c.referral_code)).await;
    assert!(matches!(retried, Ok(Registration::Created { .. })));
    assert_eq!(h.sv().ledger.audit(c.id).await.unwrap().balance, 10_000);
  }

  #[test]
  fn test_payouts_follow_rates() {
    let user = |id: i32| user::Model {
      id,
      tg_user_id: id as i64,
      phone: phone(id as i64),
      referral_code: format!("CODE{id:04}"),
      referred_by: None,
      balance: 0,
      is_admin: false,
      created_at: Utc::now().naive_utc(),
    };
    let chain: Vec<Upline> = (1..=3)
      .map(|level| Upline { level, user: user(level as i32) })
      .collect();

    let credits = payouts(&chain, &[300, 0], "+3805***01");
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].user_id, 1);
    assert_eq!(credits[0].kind, BonusKind::Level1);
    assert!(credits[0].description.contains("+3805***01"));

    assert!(payouts(&[], &[100, 50, 25], "x").is_empty());
  }
}
