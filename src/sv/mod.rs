pub mod cached;
pub mod ledger;
pub mod referral;
pub mod stats;
pub mod tour;
pub mod user;

#[cfg(test)]
pub mod testing;

pub use cached::Cached;
pub use ledger::{Credit, Ledger};
pub use referral::{Referral, Registration};
pub use stats::Stats;
pub use tour::{Completion, Tour};
pub use user::User;

use crate::{cache::Cache, config::Config, notify::Notifier, prelude::*};

/// Everything a service needs, borrowed from the application state.
#[derive(Clone, Copy)]
pub struct Ctx<'a> {
  pub db: &'a DatabaseConnection,
  pub cache: &'a dyn Cache,
  pub notifier: &'a dyn Notifier,
  pub config: &'a Config,
}

impl<'a> Ctx<'a> {
  pub fn cached(&self) -> Cached<'a> {
    Cached::new(self.cache)
  }
}

#[cfg(test)]
mod tests {
  use sea_orm::Database;

  use super::*;
  use crate::{
    cache::MemoryCache, notify::testing::Recorder, state::Services,
  };

  #[tokio::test]
  async fn test_migrations_match_entities() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let cache = MemoryCache::new();
    let notifier = Recorder::default();
    let config = Config::default();
    let sv = Services::new(Ctx {
      db: &db,
      cache: &cache,
      notifier: &notifier,
      config: &config,
    });

    let Registration::Created { user: alice, .. } =
      sv.referral.register(1, "+380500000001", None).await.unwrap()
    else {
      panic!("expected a new account");
    };
    sv.referral
      .register(2, "+380500000002", Some(&alice.referral_code))
      .await
      .unwrap();
    sv.ledger.grant(alice.id, 1_000, "welcome").await.unwrap();

    let request = sv.tour.submit(&alice, "Carpathians, 2 adults").await.unwrap();
    sv.tour.complete(request.id).await.unwrap();

    let audit = sv.ledger.audit(alice.id).await.unwrap();
    assert_eq!(audit.balance, 11_000);
    assert!(audit.is_consistent());
  }
}
