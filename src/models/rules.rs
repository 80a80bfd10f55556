//! Annoy and autoreact rule tables (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{target-user → expiry}`. While active, a received typing event from the
/// target in any room triggers an outgoing typing event back into the same
/// room (debounced by the bridge core, see spec §4.6).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnnoyRules {
    rules: HashMap<String, DateTime<Utc>>,
}

impl AnnoyRules {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a rule for `target`, expiring at `expiry`.
    pub fn set(&mut self, target: impl Into<String>, expiry: DateTime<Utc>) {
        self.rules.insert(target.into(), expiry);
    }

    /// Remove a rule, returning true if one existed.
    pub fn drop_rule(&mut self, target: &str) -> bool {
        self.rules.remove(target).is_some()
    }

    /// True if `target` currently has an unexpired rule.
    #[must_use]
    pub fn is_active(&self, target: &str, now: DateTime<Utc>) -> bool {
        self.rules.get(target).is_some_and(|expiry| *expiry > now)
    }

    /// Remove all rules whose expiry has passed; returns the removed targets.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .rules
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(target, _)| target.clone())
            .collect();
        for target in &expired {
            self.rules.remove(target);
        }
        expired
    }

    /// List all active rules as `(target, expiry)` pairs.
    #[must_use]
    pub fn list(&self) -> Vec<(String, DateTime<Utc>)> {
        self.rules.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// A single autoreact rule: react to `target`'s messages in `room_scope`
/// (or any room, if `None`) with `reaction` at the given `probability`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoreactRule {
    /// Room id to restrict the rule to, or `None` for every room.
    pub room_scope: Option<String>,
    /// Probability in `[0.0, 1.0]` of firing per observed message.
    pub probability: f64,
    /// Reaction (emoji shortcode, without colons) to post.
    pub reaction: String,
    /// Absolute expiry.
    pub expiry: DateTime<Utc>,
}

/// `{target-user → [rule...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AutoreactRules {
    rules: HashMap<String, Vec<AutoreactRule>>,
}

impl AutoreactRules {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for `target`.
    pub fn add(&mut self, target: impl Into<String>, rule: AutoreactRule) {
        self.rules.entry(target.into()).or_default().push(rule);
    }

    /// Remove all rules for `target`, returning true if any existed.
    pub fn drop_all(&mut self, target: &str) -> bool {
        self.rules.remove(target).is_some()
    }

    /// Rules currently in effect for `target` in `room_id`, both scoped and unscoped.
    #[must_use]
    pub fn matching(&self, target: &str, room_id: &str, now: DateTime<Utc>) -> Vec<&AutoreactRule> {
        self.rules
            .get(target)
            .into_iter()
            .flatten()
            .filter(|rule| rule.expiry > now)
            .filter(|rule| rule.room_scope.as_deref().is_none_or(|scope| scope == room_id))
            .collect()
    }

    /// Remove expired rules across all targets; returns how many were dropped.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut dropped = 0usize;
        for rules in self.rules.values_mut() {
            let before = rules.len();
            rules.retain(|r| r.expiry > now);
            dropped += before - rules.len();
        }
        self.rules.retain(|_, rules| !rules.is_empty());
        dropped
    }

    /// List all rules as `(target, rule)` pairs.
    #[must_use]
    pub fn list(&self) -> Vec<(String, AutoreactRule)> {
        self.rules
            .iter()
            .flat_map(|(target, rules)| rules.iter().map(move |r| (target.clone(), r.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn annoy_rule_inactive_outside_window() {
        let mut rules = AnnoyRules::new();
        rules.set("U01", now() - Duration::seconds(1));
        assert!(!rules.is_active("U01", now()));
    }

    #[test]
    fn annoy_rule_active_within_window() {
        let mut rules = AnnoyRules::new();
        rules.set("U01", now() + Duration::minutes(5));
        assert!(rules.is_active("U01", now()));
    }

    #[test]
    fn annoy_sweep_removes_only_expired() {
        let mut rules = AnnoyRules::new();
        rules.set("U01", now() - Duration::seconds(1));
        rules.set("U02", now() + Duration::minutes(5));
        let expired = rules.sweep_expired(now());
        assert_eq!(expired, vec!["U01".to_string()]);
        assert!(rules.is_active("U02", now()));
    }

    #[test]
    fn autoreact_matches_scoped_and_unscoped() {
        let mut rules = AutoreactRules::new();
        rules.add(
            "U01",
            AutoreactRule {
                room_scope: None,
                probability: 1.0,
                reaction: "thumbsup".into(),
                expiry: now() + Duration::minutes(5),
            },
        );
        rules.add(
            "U01",
            AutoreactRule {
                room_scope: Some("C99".into()),
                probability: 1.0,
                reaction: "eyes".into(),
                expiry: now() + Duration::minutes(5),
            },
        );

        let in_c01 = rules.matching("U01", "C01", now());
        assert_eq!(in_c01.len(), 1);
        assert_eq!(in_c01[0].reaction, "thumbsup");

        let in_c99 = rules.matching("U01", "C99", now());
        assert_eq!(in_c99.len(), 2);
    }

    #[test]
    fn autoreact_sweep_drops_empty_targets() {
        let mut rules = AutoreactRules::new();
        rules.add(
            "U01",
            AutoreactRule {
                room_scope: None,
                probability: 1.0,
                reaction: "eyes".into(),
                expiry: now() - Duration::seconds(1),
            },
        );
        let dropped = rules.sweep_expired(now());
        assert_eq!(dropped, 1);
        assert!(rules.matching("U01", "C01", now()).is_empty());
    }
}
