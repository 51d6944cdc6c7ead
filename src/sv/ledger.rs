use sea_orm::sea_query::Expr;
use teloxide::utils::html;

use crate::{
  cache::keys,
  entity::{BonusKind, bonus, user},
  notify,
  prelude::*,
  sv::Ctx,
};

/// One balance movement, about to be or already written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
  pub user_id: i32,
  pub tg_user_id: i64,
  /// Negative for deductions
  pub amount: i64,
  pub kind: BonusKind,
  pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Audit {
  pub balance: i64,
  /// Sum of every ledger record of the user
  pub ledger: i64,
  pub cached: Option<i64>,
}

impl Audit {
  pub fn is_consistent(&self) -> bool {
    self.balance == self.ledger
      && self.cached.is_none_or(|cached| cached == self.balance)
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
  pub users: usize,
  /// Stored balance differs from the ledger sum
  pub drifted: usize,
  /// Cached counter differed and was dropped
  pub stale: usize,
}

pub struct Ledger<'a> {
  ctx: Ctx<'a>,
}

impl<'a> Ledger<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self { ctx }
  }

  /// Writes the ledger record and moves the balance on `conn`, which is
  /// expected to be a transaction. Deductions never take the balance below
  /// zero.
  pub async fn post<C: ConnectionTrait>(
    conn: &C,
    credit: &Credit,
  ) -> Result<bonus::Model> {
    let mut update = user::Entity::update_many()
      .col_expr(
        user::Column::Balance,
        Expr::col(user::Column::Balance).add(credit.amount),
      )
      .filter(user::Column::Id.eq(credit.user_id));

    if credit.amount < 0 {
      update = update.filter(user::Column::Balance.gte(-credit.amount));
    }

    if update.exec(conn).await?.rows_affected == 0 {
      let exists = user::Entity::find_by_id(credit.user_id).one(conn).await?;
      return Err(match exists {
        Some(_) => Error::InsufficientBalance,
        None => Error::UserNotFound,
      });
    }

    let record = bonus::ActiveModel {
      id: NotSet,
      user_id: Set(credit.user_id),
      amount: Set(credit.amount),
      kind: Set(credit.kind),
      description: Set(credit.description.clone()),
      created_at: Set(Utc::now().naive_utc()),
    }
    .insert(conn)
    .await?;

    Ok(record)
  }

  pub async fn grant(
    &self,
    user_id: i32,
    amount: i64,
    description: &str,
  ) -> Result<bonus::Model> {
    if amount <= 0 {
      return Err(Error::InvalidAmount);
    }
    self.adjust(user_id, amount, description, "Manual bonus").await
  }

  pub async fn deduct(
    &self,
    user_id: i32,
    amount: i64,
    description: &str,
  ) -> Result<bonus::Model> {
    if amount <= 0 {
      return Err(Error::InvalidAmount);
    }
    self.adjust(user_id, -amount, description, "Manual deduction").await
  }

  async fn adjust(
    &self,
    user_id: i32,
    delta: i64,
    description: &str,
    fallback: &str,
  ) -> Result<bonus::Model> {
    let description = match description.trim() {
      "" => fallback.to_string(),
      text => text.to_string(),
    };

    let txn = self.ctx.db.begin().await?;

    let user = user::Entity::find_by_id(user_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    let credit = Credit {
      user_id,
      tg_user_id: user.tg_user_id,
      amount: delta,
      kind: BonusKind::Manual,
      description,
    };
    let record = Self::post(&txn, &credit).await?;

    txn.commit().await?;
    info!("Balance of user #{user_id} adjusted by {delta}");

    self.settle(&[credit]).await;
    Ok(record)
  }

  /// Post-commit side effects: cache upkeep, then notifications.
  pub async fn settle(&self, credits: &[Credit]) {
    let cached = self.ctx.cached();
    for credit in credits {
      cached.mirror(&keys::balance(credit.user_id), credit.amount).await;
      cached.invalidate(&keys::user(credit.tg_user_id)).await;
    }

    for credit in credits {
      notify::deliver(self.ctx.notifier, credit.tg_user_id, &notice(credit))
        .await;
    }
  }

  /// Newest first.
  pub async fn history(&self, user_id: i32) -> Result<Vec<bonus::Model>> {
    let records = bonus::Entity::find()
      .filter(bonus::Column::UserId.eq(user_id))
      .order_by_desc(bonus::Column::CreatedAt)
      .order_by_desc(bonus::Column::Id)
      .all(self.ctx.db)
      .await?;
    Ok(records)
  }

  pub async fn balance(&self, user_id: i32) -> Result<i64> {
    let db = self.ctx.db;
    self
      .ctx
      .cached()
      .load_counter(
        &keys::balance(user_id),
        self.ctx.config.cache.balance_ttl,
        || stored_balance(db, user_id),
      )
      .await?
      .ok_or(Error::UserNotFound)
  }

  pub async fn audit(&self, user_id: i32) -> Result<Audit> {
    let user = user::Entity::find_by_id(user_id)
      .one(self.ctx.db)
      .await?
      .ok_or(Error::UserNotFound)?;

    let ledger = bonus::Entity::find()
      .select_only()
      .column_as(Expr::col(bonus::Column::Amount).sum(), "total")
      .filter(bonus::Column::UserId.eq(user_id))
      .into_tuple::<Option<i64>>()
      .one(self.ctx.db)
      .await?
      .flatten()
      .unwrap_or(0);

    let cached = self.ctx.cached().get(&keys::balance(user_id)).await;

    Ok(Audit { balance: user.balance, ledger, cached })
  }

  /// Compares every stored balance with its ledger and drops cached
  /// counters that disagree with the store. Balances are only reported,
  /// never rewritten.
  pub async fn reconcile(&self) -> Result<Reconciliation> {
    let db = self.ctx.db;

    let balances: Vec<(i32, i64)> = user::Entity::find()
      .select_only()
      .column(user::Column::Id)
      .column(user::Column::Balance)
      .into_tuple()
      .all(db)
      .await?;

    let sums: HashMap<i32, i64> = bonus::Entity::find()
      .select_only()
      .column(bonus::Column::UserId)
      .column_as(Expr::col(bonus::Column::Amount).sum(), "total")
      .group_by(bonus::Column::UserId)
      .into_tuple::<(i32, Option<i64>)>()
      .all(db)
      .await?
      .into_iter()
      .map(|(user_id, total)| (user_id, total.unwrap_or(0)))
      .collect();

    let cached = self.ctx.cached();
    let mut report =
      Reconciliation { users: balances.len(), ..Default::default() };

    for (user_id, balance) in balances {
      let ledger = sums.get(&user_id).copied().unwrap_or(0);
      if ledger != balance {
        report.drifted += 1;
        error!(
          "Balance of user #{user_id} is {balance} but ledger sums to {ledger}"
        );
      }

      let key = keys::balance(user_id);
      if let Some(counter) = cached.get::<i64>(&key).await
        && counter != balance
      {
        report.stale += 1;
        warn!("Cached balance of user #{user_id} was {counter}, dropping");
        cached.invalidate(&key).await;
      }
    }

    Ok(report)
  }
}

async fn stored_balance<C: ConnectionTrait>(
  conn: &C,
  user_id: i32,
) -> Result<Option<i64>> {
  let balance = user::Entity::find_by_id(user_id)
    .select_only()
    .column(user::Column::Balance)
    .into_tuple::<i64>()
    .one(conn)
    .await?;
  Ok(balance)
}

fn notice(credit: &Credit) -> String {
  let amount = utils::format_money(credit.amount.abs());
  let description = html::escape(&credit.description);
  if credit.amount >= 0 {
    format!("💰 <b>+{amount}</b> credited to your balance\n💬 {description}")
  } else {
    format!("➖ <b>-{amount}</b> debited from your balance\n💬 {description}")
  }
}
