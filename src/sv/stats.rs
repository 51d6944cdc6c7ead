use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};

use crate::{
  cache::keys,
  config::MAX_LEVELS,
  entity::{BonusKind, bonus, user},
  prelude::*,
  sv::{Ctx, Ledger},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
  pub records: u64,
  pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelStats {
  pub level: u8,
  /// Users exactly `level` hops below
  pub referrals: u64,
  pub earned: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
  pub balance: i64,
  pub levels: Vec<LevelStats>,
  pub booking: i64,
  pub manual: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
  pub total_users: u64,
  /// Users with a positive balance
  pub active_users: u64,
  pub admins: u64,
  pub total_balance: i64,
  pub total_referrals: u64,
  /// Everything ever credited, deductions excluded
  pub bonus_volume: i64,
  /// Index 0 is level 1
  pub levels: Vec<Totals>,
  pub booking: Totals,
  pub manual: Totals,
}

pub struct Stats<'a> {
  ctx: Ctx<'a>,
}

impl<'a> Stats<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self { ctx }
  }

  pub async fn user(&self, user_id: i32) -> Result<UserStats> {
    let balance = Ledger::new(self.ctx).balance(user_id).await?;

    let mut levels = Vec::with_capacity(MAX_LEVELS);
    for (level, referrals) in (1..).zip(self.downline(user_id).await?) {
      let earned = match BonusKind::level(level) {
        Some(kind) => self.totals(Some(user_id), kind).await?.amount,
        None => 0,
      };
      levels.push(LevelStats { level, referrals, earned });
    }

    Ok(UserStats {
      balance,
      levels,
      booking: self.totals(Some(user_id), BonusKind::Booking).await?.amount,
      manual: self.totals(Some(user_id), BonusKind::Manual).await?.amount,
    })
  }

  /// Head count per level below `user_id`, breadth first.
  pub async fn downline(&self, user_id: i32) -> Result<Vec<u64>> {
    let mut counts = Vec::with_capacity(MAX_LEVELS);
    let mut frontier = vec![user_id];

    for _ in 0..MAX_LEVELS {
      if frontier.is_empty() {
        counts.push(0);
        continue;
      }
      let next: Vec<i32> = user::Entity::find()
        .select_only()
        .column(user::Column::Id)
        .filter(user::Column::ReferredBy.is_in(frontier))
        .into_tuple()
        .all(self.ctx.db)
        .await?;
      counts.push(next.len() as u64);
      frontier = next;
    }

    Ok(counts)
  }

  /// Cached for a short while, figures may lag behind the ledger.
  pub async fn system(&self) -> Result<SystemStats> {
    self
      .ctx
      .cached()
      .load(keys::SYSTEM_STATS, self.ctx.config.cache.stats_ttl, || async {
        self.compute().await.map(Some)
      })
      .await?
      .ok_or_else(|| Error::Internal("system stats unavailable".into()))
  }

  async fn compute(&self) -> Result<SystemStats> {
    let db = self.ctx.db;

    let total_balance = user::Entity::find()
      .select_only()
      .column_as(Expr::col(user::Column::Balance).sum(), "total")
      .into_tuple::<Option<i64>>()
      .one(db)
      .await?
      .flatten()
      .unwrap_or(0);

    let bonus_volume = bonus::Entity::find()
      .select_only()
      .column_as(Expr::col(bonus::Column::Amount).sum(), "total")
      .filter(bonus::Column::Amount.gt(0))
      .into_tuple::<Option<i64>>()
      .one(db)
      .await?
      .flatten()
      .unwrap_or(0);

    let mut levels = Vec::with_capacity(MAX_LEVELS);
    for kind in BonusKind::LEVELS {
      levels.push(self.totals(None, kind).await?);
    }

    Ok(SystemStats {
      total_users: user::Entity::find().count(db).await?,
      active_users: user::Entity::find()
        .filter(user::Column::Balance.gt(0))
        .count(db)
        .await?,
      admins: user::Entity::find()
        .filter(user::Column::IsAdmin.eq(true))
        .count(db)
        .await?,
      total_balance,
      total_referrals: user::Entity::find()
        .filter(user::Column::ReferredBy.is_not_null())
        .count(db)
        .await?,
      bonus_volume,
      levels,
      booking: self.totals(None, BonusKind::Booking).await?,
      manual: self.totals(None, BonusKind::Manual).await?,
    })
  }

  async fn totals(
    &self,
    user_id: Option<i32>,
    kind: BonusKind,
  ) -> Result<Totals> {
    let mut query = bonus::Entity::find()
      .select_only()
      .column_as(Expr::col(bonus::Column::Id).count(), "records")
      .column_as(Expr::col(bonus::Column::Amount).sum(), "amount")
      .filter(bonus::Column::Kind.eq(kind));

    if let Some(user_id) = user_id {
      query = query.filter(bonus::Column::UserId.eq(user_id));
    }

    let (records, amount) = query
      .into_tuple::<(i64, Option<i64>)>()
      .one(self.ctx.db)
      .await?
      .unwrap_or((0, None));

    Ok(Totals { records: records as u64, amount: amount.unwrap_or(0) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::testing::Harness;

  #[tokio::test]
  async fn test_user_stats_per_level() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    let c = h.register(3, Some(&b.referral_code)).await;
    h.register(4, Some(&c.referral_code)).await;
    h.register(5, Some(&a.referral_code)).await;

    let stats = h.sv().stats.user(a.id).await.unwrap();
    assert_eq!(
      stats.levels,
      vec![
        LevelStats { level: 1, referrals: 2, earned: 20_000 },
        LevelStats { level: 2, referrals: 1, earned: 5_000 },
        LevelStats { level: 3, referrals: 1, earned: 2_500 },
      ]
    );
    assert_eq!(stats.balance, 27_500);
    assert_eq!(stats.booking, 0);
  }

  #[tokio::test]
  async fn test_manual_bonus_is_not_a_level() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    h.sv().ledger.grant(a.id, 4_200, "gift").await.unwrap();

    let stats = h.sv().stats.user(a.id).await.unwrap();
    assert!(stats.levels.iter().all(|level| level.earned == 0));
    assert_eq!(stats.manual, 4_200);
    assert_eq!(stats.balance, 4_200);

    let system = h.sv().stats.system().await.unwrap();
    assert_eq!(system.manual, Totals { records: 1, amount: 4_200 });
    assert!(system.levels.iter().all(|level| level.records == 0));
  }

  #[tokio::test]
  async fn test_system_stats() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    let b = h.register(2, Some(&a.referral_code)).await;
    h.register(3, Some(&b.referral_code)).await;
    h.register(4, None).await;
    h.sv().ledger.deduct(a.id, 1_000, "payout").await.unwrap();

    let stats = h.sv().stats.system().await.unwrap();
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.active_users, 2);
    assert_eq!(stats.total_referrals, 2);
    assert_eq!(stats.total_balance, 24_000);
    assert_eq!(stats.bonus_volume, 25_000);
    assert_eq!(stats.levels[0], Totals { records: 2, amount: 20_000 });
    assert_eq!(stats.levels[1], Totals { records: 1, amount: 5_000 });
    assert_eq!(stats.levels[2], Totals::default());
    assert_eq!(stats.manual, Totals { records: 1, amount: -1_000 });
  }

  #[tokio::test]
  async fn test_system_stats_cold_and_warm_agree() {
    let h = Harness::new().await;
    let a = h.register(1, None).await;
    h.register(2, Some(&a.referral_code)).await;

    let warm = h.sv().stats.system().await.unwrap();
    assert!(h.memory.len() > 0);
    let cached = h.sv().stats.system().await.unwrap();
    h.memory.clear();
    let cold = h.sv().stats.system().await.unwrap();

    assert_eq!(warm, cached);
    assert_eq!(warm, cold);
  }

  #[tokio::test]
  async fn test_stats_without_cache() {
    let h = Harness::broken().await;
    let a = h.register(1, None).await;
    h.register(2, Some(&a.referral_code)).await;

    assert_eq!(h.sv().stats.system().await.unwrap().total_users, 2);
    assert_eq!(h.sv().stats.user(a.id).await.unwrap().balance, 10_000);
  }
}
