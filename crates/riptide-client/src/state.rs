//! Subscription state bookkeeping.
//!
//! [`StateSnapshot`] is an immutable view of everything the client is
//! subscribed to. Mutators on [`SharedState`] build a new snapshot and
//! swap it in under a write lock; the subscribe loop and the heartbeat
//! task each take an `Arc` clone per iteration and never observe a
//! partial mutation.
//!
//! Changes that alter the effective poll target (channels, groups, or
//! the presence set, but not staged state) bump a `watch` epoch so the
//! loop can abandon an in-flight poll and adopt the new set promptly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::event::PRESENCE_SUFFIX;

/// Immutable view of the current subscription set.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    channels: BTreeSet<String>,
    groups: BTreeSet<String>,
    presence_channels: BTreeSet<String>,
    channel_state: BTreeMap<String, Value>,
}

impl StateSnapshot {
    /// Subscribed channel names.
    #[must_use]
    pub fn channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    /// Subscribed channel-group names.
    #[must_use]
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Channels with presence announcements enabled.
    #[must_use]
    pub fn presence_channels(&self) -> &BTreeSet<String> {
        &self.presence_channels
    }

    /// Staged per-channel presence state, including entries staged for
    /// channels that are not currently subscribed.
    #[must_use]
    pub fn channel_state(&self) -> &BTreeMap<String, Value> {
        &self.channel_state
    }

    /// Whether nothing is subscribed (the loop parks on an empty set).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.groups.is_empty()
    }

    /// Channel list as sent on a subscribe poll: every subscribed
    /// channel, plus a derived `<name>-pnpres` entry per presence-enabled
    /// channel.
    #[must_use]
    pub fn poll_channels(&self) -> Vec<String> {
        let mut out: Vec<String> = self.channels.iter().cloned().collect();
        out.extend(
            self.presence_channels
                .iter()
                .map(|c| format!("{c}{PRESENCE_SUFFIX}")),
        );
        out
    }

    /// Staged state restricted to currently subscribed channels.
    ///
    /// This is what heartbeats and polls carry; state staged for an
    /// unsubscribed channel stays dormant until the channel is subscribed.
    #[must_use]
    pub fn active_state(&self) -> BTreeMap<String, Value> {
        self.channel_state
            .iter()
            .filter(|(ch, _)| self.channels.contains(*ch))
            .map(|(ch, v)| (ch.clone(), v.clone()))
            .collect()
    }

    /// The poll-target triple used to detect changes that must cancel an
    /// in-flight poll.
    fn poll_target(&self) -> (&BTreeSet<String>, &BTreeSet<String>, &BTreeSet<String>) {
        (&self.channels, &self.groups, &self.presence_channels)
    }
}

/// Shared, mutation-safe subscription state.
///
/// One instance per manager. Mutators take the write lock briefly to
/// install a new snapshot; readers clone the `Arc` out of the read lock.
#[derive(Debug)]
pub(crate) struct SharedState {
    current: RwLock<Arc<StateSnapshot>>,
    epoch: watch::Sender<u64>,
}

impl SharedState {
    /// Creates an empty subscription state.
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(StateSnapshot::default())),
            epoch,
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Returns a receiver that observes poll-target epoch bumps.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Adds channels and groups to the subscription set.
    ///
    /// Idempotent on the set: subscribing an already-subscribed channel
    /// is a no-op. `state` entries are staged per channel. Returns
    /// whether the effective poll target changed.
    pub fn subscribe(
        &self,
        channels: &[String],
        groups: &[String],
        with_presence: bool,
        state: &BTreeMap<String, Value>,
    ) -> bool {
        self.mutate(|next| {
            for ch in channels {
                next.channels.insert(ch.clone());
                if with_presence {
                    next.presence_channels.insert(ch.clone());
                }
            }
            for g in groups {
                next.groups.insert(g.clone());
            }
            for (ch, v) in state {
                next.channel_state.insert(ch.clone(), v.clone());
            }
        })
    }

    /// Removes channels and groups from the subscription set.
    ///
    /// Staged state and the presence flag for a removed channel are
    /// dropped with it. Returns the names that were actually removed
    /// (for the presence leave announce).
    pub fn unsubscribe(
        &self,
        channels: &[String],
        groups: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let mut removed_channels = Vec::new();
        let mut removed_groups = Vec::new();
        self.mutate(|next| {
            for ch in channels {
                if next.channels.remove(ch) {
                    removed_channels.push(ch.clone());
                }
                next.presence_channels.remove(ch);
                next.channel_state.remove(ch);
            }
            for g in groups {
                if next.groups.remove(g) {
                    removed_groups.push(g.clone());
                }
            }
        });
        (removed_channels, removed_groups)
    }

    /// Stages presence state for a channel.
    ///
    /// Accepted whether or not the channel is subscribed; dormant state
    /// takes effect once the channel is. Never cancels an in-flight poll.
    pub fn set_staged_state(&self, channel: &str, state: Value) {
        self.mutate(|next| {
            next.channel_state.insert(channel.to_string(), state);
        });
    }

    /// Clears the whole subscription set, returning the removed channel
    /// and group names.
    pub fn clear(&self) -> (Vec<String>, Vec<String>) {
        let mut removed_channels = Vec::new();
        let mut removed_groups = Vec::new();
        self.mutate(|next| {
            removed_channels = next.channels.iter().cloned().collect();
            removed_groups = next.groups.iter().cloned().collect();
            next.channels.clear();
            next.groups.clear();
            next.presence_channels.clear();
            next.channel_state.clear();
        });
        (removed_channels, removed_groups)
    }

    /// Applies `f` to a copy of the current snapshot and installs the
    /// result. Bumps the epoch only when the poll target changed.
    fn mutate(&self, f: impl FnOnce(&mut StateSnapshot)) -> bool {
        let mut guard = self.current.write();
        let mut next = StateSnapshot::clone(&guard);
        f(&mut next);
        let target_changed = next.poll_target() != guard.poll_target();
        *guard = Arc::new(next);
        drop(guard);

        if target_changed {
            self.epoch.send_modify(|e| *e += 1);
            debug!("subscription poll target changed");
        }
        target_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_net_effect_of_subscribe_unsubscribe() {
        let state = SharedState::new();
        state.subscribe(&names(&["a", "b"]), &[], false, &BTreeMap::new());
        state.subscribe(&names(&["b", "c"]), &names(&["g1"]), false, &BTreeMap::new());
        state.unsubscribe(&names(&["a"]), &[]);

        let snap = state.snapshot();
        assert_eq!(
            snap.channels().iter().cloned().collect::<Vec<_>>(),
            names(&["b", "c"])
        );
        assert!(snap.groups().contains("g1"));
    }

    #[test]
    fn test_subscribe_is_idempotent_on_the_set() {
        let state = SharedState::new();
        assert!(state.subscribe(&names(&["a"]), &[], false, &BTreeMap::new()));
        // Same channel again: set unchanged, no epoch bump.
        assert!(!state.subscribe(&names(&["a"]), &[], false, &BTreeMap::new()));
        assert_eq!(state.snapshot().channels().len(), 1);
    }

    #[test]
    fn test_presence_flag_derives_poll_channels() {
        let state = SharedState::new();
        state.subscribe(&names(&["a"]), &[], true, &BTreeMap::new());
        state.subscribe(&names(&["b"]), &[], false, &BTreeMap::new());

        let polled = state.snapshot().poll_channels();
        assert_eq!(polled, names(&["a", "b", "a-pnpres"]));
    }

    #[test]
    fn test_staged_state_dormant_until_subscribed() {
        let state = SharedState::new();
        state.set_staged_state("ch", json!({"mood": "happy"}));

        // Not subscribed yet: staged but not active.
        let snap = state.snapshot();
        assert!(snap.channel_state().contains_key("ch"));
        assert!(snap.active_state().is_empty());

        state.subscribe(&names(&["ch"]), &[], true, &BTreeMap::new());
        let active = state.snapshot().active_state();
        assert_eq!(active.get("ch"), Some(&json!({"mood": "happy"})));
    }

    #[test]
    fn test_staged_state_change_does_not_bump_epoch() {
        let state = SharedState::new();
        state.subscribe(&names(&["ch"]), &[], false, &BTreeMap::new());
        let mut rx = state.watch();
        rx.borrow_and_update();

        state.set_staged_state("ch", json!({"k": 1}));
        assert!(!rx.has_changed().unwrap());

        state.subscribe(&names(&["other"]), &[], false, &BTreeMap::new());
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_unsubscribe_drops_presence_and_state() {
        let state = SharedState::new();
        let mut staged = BTreeMap::new();
        staged.insert("ch".to_string(), json!({"k": 1}));
        state.subscribe(&names(&["ch"]), &[], true, &staged);

        let (removed, _) = state.unsubscribe(&names(&["ch", "missing"]), &[]);
        assert_eq!(removed, names(&["ch"]));

        let snap = state.snapshot();
        assert!(snap.is_empty());
        assert!(snap.presence_channels().is_empty());
        assert!(snap.channel_state().is_empty());
    }

    #[test]
    fn test_clear_returns_everything() {
        let state = SharedState::new();
        state.subscribe(&names(&["a", "b"]), &names(&["g"]), true, &BTreeMap::new());

        let (chans, groups) = state.clear();
        assert_eq!(chans, names(&["a", "b"]));
        assert_eq!(groups, names(&["g"]));
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let state = SharedState::new();
        state.subscribe(&names(&["a"]), &[], false, &BTreeMap::new());
        let before = state.snapshot();
        state.subscribe(&names(&["b"]), &[], false, &BTreeMap::new());

        // The earlier snapshot is immutable; only a fresh read sees "b".
        assert_eq!(before.channels().len(), 1);
        assert_eq!(state.snapshot().channels().len(), 2);
    }
}
