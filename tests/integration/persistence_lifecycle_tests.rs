//! Full persisted-state lifecycle across a simulated restart: annoy and
//! autoreact rules survive the round trip, and an expiry sweep behaves the
//! same after a reload as it would have before one (spec §4.7).

use chrono::{Duration as ChronoDuration, Utc};
use irslackd::models::rules::AutoreactRule;
use irslackd::persistence::state_file::{load, save, PersistedState};

#[tokio::test]
async fn annoy_and_autoreact_rules_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json.lp");

    let mut before = PersistedState::default();
    let future = Utc::now() + ChronoDuration::minutes(10);
    before.annoy_rules.set("U02", future);
    before.autoreact_rules.add(
        "U03".to_owned(),
        AutoreactRule {
            room_scope: Some("C01".into()),
            probability: 0.5,
            reaction: "eyes".into(),
            expiry: future,
        },
    );
    save(&path, &before).await;

    // Simulate the process restarting: a brand new `PersistedState` loaded
    // from the same path should see exactly what was saved.
    let mut after_restart = load(&path).await;
    assert!(after_restart.annoy_rules.is_active("U02", Utc::now()));
    assert_eq!(after_restart.autoreact_rules.matching("U03", "C01", Utc::now()).len(), 1);

    // An expiry sweep run post-restart behaves the same as one run before:
    // nothing should be swept yet, since the rule hasn't expired.
    assert!(after_restart.annoy_rules.sweep_expired(Utc::now()).is_empty());
}

#[tokio::test]
async fn expired_rules_do_not_survive_a_sweep_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json.lp");

    let mut before = PersistedState::default();
    let past = Utc::now() - ChronoDuration::minutes(1);
    before.annoy_rules.set("U02", past);
    save(&path, &before).await;

    let mut after_restart = load(&path).await;
    let swept = after_restart.annoy_rules.sweep_expired(Utc::now());
    assert_eq!(swept, vec!["U02".to_owned()]);
    assert!(!after_restart.annoy_rules.is_active("U02", Utc::now()));

    // The sweep itself doesn't persist; only an explicit save does.
    save(&path, &after_restart).await;
    let reloaded = load(&path).await;
    assert!(!reloaded.annoy_rules.is_active("U02", Utc::now()));
}
