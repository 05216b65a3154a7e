//! Integration tests for `SqliteStore` against a temporary database file.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use clipduel_core::{
  Error as CoreError,
  ballot::Ballot,
  ratelimit::{RateLimitDecision, RateLimitPolicy},
  store::BallotStore,
  user::User,
  vote::{Pair, SubmitOutcome},
};
use tempfile::TempDir;

use crate::{Error, SqliteStore, StoreOptions};

const X: &str = "https://www.youtube.com/watch?v=oxEUk5c1iGU";
const Y: &str = "https://www.youtube.com/watch?v=TFNYbCGCIaw";
const Z: &str = "https://www.youtube.com/watch?v=N0qzSv9c0IY";

async fn store() -> (TempDir, SqliteStore) {
  let dir = tempfile::tempdir().expect("create temp dir");
  let options = StoreOptions { read_pool_size: Some(4), ..StoreOptions::default() };
  let store = SqliteStore::open(dir.path().join("votes.db"), options)
    .await
    .expect("open store");
  (dir, store)
}

async fn seeded(urls: &[&str]) -> (TempDir, SqliteStore) {
  let (dir, s) = store().await;
  let seed: Vec<String> = urls.iter().map(|u| (*u).to_owned()).collect();
  s.setup(&seed).await.unwrap();
  (dir, s)
}

async fn count(s: &SqliteStore, sql: &'static str) -> i64 {
  s.read(move |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))
    .await
    .unwrap()
}

fn urls(pair: &Pair) -> HashSet<String> {
  HashSet::from([pair.a.clone(), pair.b.clone()])
}

// ─── Storage engine ──────────────────────────────────────────────────────────

#[tokio::test]
async fn setup_twice_keeps_single_seed_set() {
  let (_dir, s) = store().await;
  let seed = vec![X.to_owned(), Y.to_owned(), X.to_owned()];

  let first = s.setup(&seed).await.unwrap();
  let items_once = s.list_items().await.unwrap();

  let second = s.setup(&seed).await.unwrap();
  let items_twice = s.list_items().await.unwrap();

  assert_eq!(first, 2);
  assert_eq!(second, 0);
  assert_eq!(items_once, items_twice);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM items").await, 2);
}

#[tokio::test]
async fn setup_leaves_existing_votes_untouched() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.next_pair(&user).await.unwrap().unwrap();
  s.submit(&user, X).await.unwrap();

  s.setup(&[X.to_owned(), Y.to_owned()]).await.unwrap();

  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 2);
  assert_eq!(s.tally().await.unwrap()[X], 1);
}

#[tokio::test]
async fn setup_skips_invalid_seed_urls() {
  let (_dir, s) = store().await;
  let inserted = s
    .setup(&["https://example.com/nope".to_owned(), Z.to_owned()])
    .await
    .unwrap();
  assert_eq!(inserted, 1);
  assert_eq!(s.list_items().await.unwrap().len(), 1);
}

#[tokio::test]
async fn setup_stamps_schema_version() {
  let (_dir, s) = store().await;
  assert_eq!(count(&s, "PRAGMA user_version").await, crate::schema::SCHEMA_VERSION);
}

#[tokio::test]
async fn reopening_an_existing_file_keeps_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("votes.db");

  let s = SqliteStore::open(&path, StoreOptions::default()).await.unwrap();
  s.setup(&[X.to_owned(), Y.to_owned()]).await.unwrap();
  s.close(Duration::from_secs(1)).await.unwrap();

  let s = SqliteStore::open(&path, StoreOptions::default()).await.unwrap();
  assert_eq!(s.list_items().await.unwrap().len(), 2);
}

#[tokio::test]
async fn connections_use_wal_and_busy_timeout() {
  let (_dir, s) = store().await;
  let (mode, timeout): (String, i64) = s
    .read(|conn| {
      let mode = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
      let timeout = conn.query_row("PRAGMA busy_timeout", [], |r| r.get(0))?;
      Ok((mode, timeout))
    })
    .await
    .unwrap();
  assert_eq!(mode.to_ascii_lowercase(), "wal");
  assert_eq!(timeout, 5_000);
}

#[tokio::test]
async fn read_pool_rejects_mutations() {
  let (_dir, s) = store().await;
  let result = s
    .read(|conn| {
      conn.execute("INSERT INTO users (ip) VALUES ('1.2.3.4')", [])?;
      Ok(())
    })
    .await;
  assert!(matches!(result, Err(Error::Database(_))));
  assert_eq!(count(&s, "SELECT COUNT(*) FROM users").await, 0);
}

#[tokio::test]
async fn closed_store_fails_fast() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  s.close(Duration::from_secs(1)).await.unwrap();
  assert!(s.is_closed());

  let result = tokio::time::timeout(Duration::from_secs(1), s.next_pair(&user))
    .await
    .expect("closed store must not block");
  assert!(matches!(result, Err(Error::Closed)));
  assert!(s.tally().await.unwrap_err().is_closed());
  assert!(s.get_or_create_user("10.0.0.2").await.unwrap_err().is_closed());

  // Second close is a no-op.
  s.close(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn close_waits_for_in_flight_write() {
  let (_dir, s) = store().await;
  let slow = s.clone();
  let writer = tokio::spawn(async move {
    slow
      .write(|conn| {
        std::thread::sleep(Duration::from_millis(200));
        conn.execute("INSERT INTO users (ip) VALUES ('slow')", [])?;
        Ok(())
      })
      .await
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  s.close(Duration::from_secs(5)).await.unwrap();

  writer.await.unwrap().expect("in-flight write completes before close");
}

#[tokio::test]
async fn cancelled_write_releases_its_guard_and_still_completes() {
  let (_dir, s) = store().await;
  let slow = s.write(|conn| {
    std::thread::sleep(Duration::from_millis(300));
    conn.execute("INSERT INTO users (ip) VALUES ('slow')", [])?;
    Ok(())
  });
  assert!(tokio::time::timeout(Duration::from_millis(50), slow).await.is_err());

  // The guard is gone even though the closure is still running.
  assert_eq!(s.write_stats().in_flight, 0);

  // The connection thread finishes the abandoned closure before this one.
  s.write(|conn| {
    conn.execute("INSERT INTO users (ip) VALUES ('next')", [])?;
    Ok(())
  })
  .await
  .unwrap();
  assert_eq!(count(&s, "SELECT COUNT(*) FROM users").await, 2);
}

// ─── Items ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_item_normalizes_and_deduplicates() {
  let (_dir, s) = store().await;
  let first = s.add_item(&format!("  {X}  ")).await.unwrap();
  let again = s.add_item(X).await.unwrap();

  assert_eq!(first.url, X);
  assert_eq!(first, again);
  assert_eq!(s.get_item(X).await.unwrap(), Some(first));
  assert_eq!(s.get_item(Z).await.unwrap(), None);
}

#[tokio::test]
async fn add_item_rejects_foreign_urls() {
  let (_dir, s) = store().await;
  let err = s.add_item("https://example.com/video").await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::InvalidItemUrl(_))));
  assert!(s.list_items().await.unwrap().is_empty());
}

// ─── User registry ───────────────────────────────────────────────────────────

#[tokio::test]
async fn same_ip_maps_to_same_user() {
  let (_dir, s) = store().await;
  let u1 = s.get_or_create_user("192.168.1.1").await.unwrap();
  let u2 = s.get_or_create_user("192.168.1.1").await.unwrap();
  let u3 = s.get_or_create_user("192.168.1.2").await.unwrap();

  assert_eq!(u1, u2);
  assert_ne!(u1.id, u3.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_resolves_to_one_user() {
  let (_dir, s) = store().await;

  let handles: Vec<_> = (0..16)
    .map(|_| {
      let s = s.clone();
      tokio::spawn(async move { s.get_or_create_user("203.0.113.7").await })
    })
    .collect();

  let mut ids = HashSet::new();
  for h in handles {
    ids.insert(h.await.unwrap().expect("no constraint error surfaces").id);
  }

  assert_eq!(ids.len(), 1);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM users").await, 1);
}

// ─── Pair selection & assignment ─────────────────────────────────────────────

#[tokio::test]
async fn select_pair_needs_two_unseen_items() {
  let (_dir, s) = store().await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  assert_eq!(s.select_pair(&user).await.unwrap(), None);

  s.add_item(X).await.unwrap();
  assert_eq!(s.select_pair(&user).await.unwrap(), None);

  s.add_item(Y).await.unwrap();
  let pair = s.select_pair(&user).await.unwrap().unwrap();
  assert_eq!(urls(&pair), HashSet::from([X.to_owned(), Y.to_owned()]));
}

#[tokio::test]
async fn select_pair_does_not_write() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.select_pair(&user).await.unwrap().unwrap();
  assert_eq!(s.current_assignment(&user).await.unwrap(), None);
}

#[tokio::test]
async fn next_pair_without_items_leaves_no_assignment() {
  let (_dir, s) = seeded(&[X]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  assert_eq!(s.next_pair(&user).await.unwrap(), None);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM active_assignments").await, 0);
}

#[tokio::test]
async fn second_next_pair_replaces_the_first() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  let first = s.next_pair(&user).await.unwrap().unwrap();
  let second = s.next_pair(&user).await.unwrap().unwrap();

  let current = s.current_assignment(&user).await.unwrap().unwrap();
  assert_eq!(current.pair(), second);
  assert_eq!(current.user_id, user.id);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM active_assignments").await, 1);
  // The first pair is only retrievable if the random draw repeated it.
  if urls(&first) != urls(&second) {
    assert_ne!(current.pair(), first);
  }
}

#[tokio::test]
async fn voted_items_are_never_offered_again() {
  let urls_all = [
    X,
    Y,
    Z,
    "https://youtu.be/aaaaaaaaaaa",
    "https://youtu.be/bbbbbbbbbbb",
    "https://youtu.be/ccccccccccc",
  ];
  let (_dir, s) = seeded(&urls_all).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  let mut seen = HashSet::new();
  while let Some(pair) = s.next_pair(&user).await.unwrap() {
    assert!(!seen.contains(&pair.a) && !seen.contains(&pair.b), "re-offered {pair:?}");
    s.submit(&user, &pair.b).await.unwrap();
    seen.extend(urls(&pair));
  }

  assert_eq!(seen.len(), urls_all.len());
}

// ─── Vote recording ──────────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_two_items() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  let pair = s.next_pair(&user).await.unwrap().unwrap();
  assert_eq!(urls(&pair), HashSet::from([X.to_owned(), Y.to_owned()]));

  let outcome = s.submit(&user, X).await.unwrap();
  assert_eq!(outcome, SubmitOutcome::Recorded { winner: X.into(), loser: Y.into() });
  assert_eq!(s.current_assignment(&user).await.unwrap(), None);

  let tally = s.tally().await.unwrap();
  assert_eq!(tally[X], 1);
  assert_eq!(tally[Y], 0);

  assert_eq!(s.next_pair(&user).await.unwrap(), None);
  assert_eq!(s.my_votes(&user).await.unwrap(), vec![X.to_owned()]);
}

#[tokio::test]
async fn submitting_a_replaced_pairs_item_is_rejected() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap();
  s.assign(&user, &Pair { a: Y.into(), b: Z.into() }).await.unwrap();

  assert_eq!(s.submit(&user, X).await.unwrap(), SubmitOutcome::InvalidChoice);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 0);

  let current = s.current_assignment(&user).await.unwrap().unwrap();
  assert_eq!(current.pair(), Pair { a: Y.into(), b: Z.into() });
}

#[tokio::test]
async fn invalid_choice_changes_nothing() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap();
  let before = s.current_assignment(&user).await.unwrap();

  assert_eq!(s.submit(&user, Z).await.unwrap(), SubmitOutcome::InvalidChoice);
  assert_eq!(s.submit(&user, "not a url").await.unwrap(), SubmitOutcome::InvalidChoice);

  assert_eq!(s.current_assignment(&user).await.unwrap(), before);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 0);
}

#[tokio::test]
async fn submit_without_assignment_is_a_no_op() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();

  assert_eq!(s.submit(&user, X).await.unwrap(), SubmitOutcome::NoAssignment);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 0);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM active_assignments").await, 0);
}

#[tokio::test]
async fn pair_selected_before_a_submit_is_not_reassigned() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap().unwrap();

  // A concurrent next_pair read its snapshot before the submit committed.
  let stale = s.select_pair(&user).await.unwrap().unwrap();
  assert!(matches!(s.submit(&user, X).await.unwrap(), SubmitOutcome::Recorded { .. }));

  assert_eq!(s.assign(&user, &stale).await.unwrap(), None);
  assert_eq!(s.current_assignment(&user).await.unwrap(), None);

  assert_eq!(s.submit(&user, X).await.unwrap(), SubmitOutcome::NoAssignment);
  assert_eq!(s.tally().await.unwrap()[X], 1);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 2);
}

#[tokio::test]
async fn already_voted_assignment_is_cleared_instead_of_scored() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.next_pair(&user).await.unwrap().unwrap();
  s.submit(&user, X).await.unwrap();

  // Plant the resolved pair back as the active assignment.
  let user_id = user.id;
  s.write(move |conn| {
    conn.execute(
      "INSERT INTO active_assignments (user_id, start_time, item_a, item_b)
       VALUES (?1, 0, ?2, ?3)",
      rusqlite::params![user_id, X, Y],
    )?;
    Ok(())
  })
  .await
  .unwrap();

  assert_eq!(s.submit(&user, X).await.unwrap(), SubmitOutcome::NoAssignment);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM active_assignments").await, 0);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 2);
  assert_eq!(s.tally().await.unwrap()[X], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_submits_score_once() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.next_pair(&user).await.unwrap().unwrap();

  let handles: Vec<_> = (0..8)
    .map(|_| {
      let s = s.clone();
      let user = user.clone();
      tokio::spawn(async move { s.submit(&user, X).await })
    })
    .collect();

  let mut recorded = 0;
  for h in handles {
    if matches!(h.await.unwrap().unwrap(), SubmitOutcome::Recorded { .. }) {
      recorded += 1;
    }
  }

  assert_eq!(recorded, 1);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 2);
}

// ─── Tally ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tally_lists_every_item_and_counts_wins() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;

  for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
    let user = s.get_or_create_user(ip).await.unwrap();
    s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap();
    s.submit(&user, X).await.unwrap();
  }

  let tally = s.tally().await.unwrap();
  assert_eq!(tally.len(), 3);
  assert_eq!(tally[X], 3);
  assert_eq!(tally[Y], 0);
  assert_eq!(tally[Z], 0);

  let wins: i64 = s
    .read(|conn| {
      Ok(conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE item_url = ?1 AND score = 1",
        [X],
        |r| r.get(0),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(tally[X], wins);
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_new_users_each_get_a_pair_with_one_writer() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;

  let handles: Vec<_> = (0..32)
    .map(|i| {
      let s = s.clone();
      tokio::spawn(async move {
        let user = s.get_or_create_user(&format!("198.51.100.{i}")).await?;
        s.next_pair(&user).await
      })
    })
    .collect();

  for h in handles {
    assert!(h.await.unwrap().unwrap().is_some());
  }

  assert_eq!(count(&s, "SELECT COUNT(*) FROM users").await, 32);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM active_assignments").await, 32);

  let stats = s.write_stats();
  assert_eq!(stats.peak, 1);
  assert_eq!(stats.in_flight, 0);
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limit_bans_bursts_and_persists_counters() {
  let (_dir, s) = store().await;
  let user = s.get_or_create_user("10.0.0.1").await.unwrap();
  let policy = RateLimitPolicy { enabled: true, ..RateLimitPolicy::default() };
  let start = Utc::now();

  let mut last = RateLimitDecision::Allowed;
  for i in 0..=policy.max_failures + 1 {
    let now = start + TimeDelta::milliseconds(i64::from(i) * 10);
    last = s.check_rate_limit(&user, policy, now).await.unwrap();
  }
  assert!(matches!(last, RateLimitDecision::Limited { .. }));

  let later = start + TimeDelta::seconds(60);
  assert_eq!(
    s.check_rate_limit(&user, policy, later).await.unwrap(),
    RateLimitDecision::Allowed
  );
}

// ─── Ballot service ──────────────────────────────────────────────────────────

fn ballot(s: &SqliteStore, deadline_offset: TimeDelta) -> Ballot<SqliteStore> {
  Ballot::new(Arc::new(s.clone()), Utc::now() + deadline_offset, RateLimitPolicy::default())
}

#[tokio::test]
async fn past_deadline_rejects_without_mutation() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let user: User = s.get_or_create_user("10.0.0.1").await.unwrap();
  s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap();
  let before = s.current_assignment(&user).await.unwrap();

  let closed = ballot(&s, TimeDelta::hours(-1));
  assert!(matches!(closed.next_pair(&user).await, Err(CoreError::VotingClosed)));
  assert!(matches!(closed.submit(&user, X).await, Err(CoreError::VotingClosed)));

  assert_eq!(s.current_assignment(&user).await.unwrap(), before);
  assert_eq!(count(&s, "SELECT COUNT(*) FROM votes").await, 0);
  assert!(closed.totals().await.is_ok());
}

#[tokio::test]
async fn ballot_maps_invalid_and_empty_choices() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;
  let open = ballot(&s, TimeDelta::hours(1));
  let user = open.identify("10.0.0.1").await.unwrap();
  s.assign(&user, &Pair { a: X.into(), b: Y.into() }).await.unwrap();

  assert!(matches!(open.submit(&user, "").await, Err(CoreError::EmptyChoice)));
  assert!(matches!(open.submit(&user, Z).await, Err(CoreError::InvalidChoice(_))));
  assert!(matches!(
    open.submit(&user, Y).await,
    Ok(SubmitOutcome::Recorded { .. })
  ));
  assert_eq!(open.submit(&user, Y).await.unwrap(), SubmitOutcome::NoAssignment);
}

#[tokio::test]
async fn ballot_enforces_rate_limit_when_enabled() {
  let (_dir, s) = seeded(&[X, Y, Z]).await;
  let policy = RateLimitPolicy { enabled: true, max_failures: 1, ..RateLimitPolicy::default() };
  let ballot = Ballot::new(Arc::new(s.clone()), Utc::now() + TimeDelta::hours(1), policy);
  let user = ballot.identify("10.0.0.1").await.unwrap();

  // The first request has no predecessor; the next two form a burst.
  ballot.next_pair(&user).await.unwrap();
  ballot.next_pair(&user).await.unwrap();
  let err = ballot.next_pair(&user).await.unwrap_err();
  assert!(matches!(err, CoreError::RateLimited { .. }));
}

#[tokio::test]
async fn shutdown_closes_the_store() {
  let (_dir, s) = seeded(&[X, Y]).await;
  let b = ballot(&s, TimeDelta::hours(1));
  b.shutdown(Duration::from_secs(1)).await.unwrap();
  assert!(s.is_closed());
  assert!(matches!(b.totals().await, Err(CoreError::Store(_))));
}
