use crate::error::{self, Result};
use crate::types::{Action, ControlMap, ControlPoint};
use snafu::ensure;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A control map stamped with the wall-clock times it takes effect. `halfway_time` marks the
/// midpoint between `created_at` and `expiry_time`; callers may use it as a cue to re-fetch a
/// fresher map before expiry rather than to change aggregation behavior.
struct Stamped {
    map: ControlMap,
    expiry_time: SystemTime,
    halfway_time: SystemTime,
    expired_signaled: bool,
}

/// The set of live control maps consulted at each control point. Maps are ID-unique; inserting
/// one with an ID already present is rejected rather than silently replacing it, since a
/// replacement would usually indicate the caller meant to `remove` first.
pub struct Pool {
    maps: HashMap<String, Stamped>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            maps: HashMap::new(),
        }
    }

    /// Validates and inserts `map`, stamping it with an expiry `ttl` from `now`.
    pub fn insert(&mut self, map: ControlMap, now: SystemTime, ttl: Duration) -> Result<()> {
        let map = map.validate()?;
        ensure!(
            !self.maps.contains_key(&map.id),
            error::DuplicateIdSnafu { id: map.id.clone() }
        );
        let expiry_time = now + ttl;
        let halfway_time = now + ttl / 2;
        self.maps.insert(
            map.id.clone(),
            Stamped {
                map,
                expiry_time,
                halfway_time,
                expired_signaled: false,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.maps.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    fn is_expired(stamped: &Stamped, now: SystemTime) -> bool {
        stamped.expired_signaled || now >= stamped.expiry_time
    }

    /// `Expired()`: monotonic per-map expiry flag. Once a map has been observed past its
    /// `expiry_time`, it is latched expired even if queried again with an earlier `now`.
    pub fn mark_expired_as_of(&mut self, now: SystemTime) {
        for stamped in self.maps.values_mut() {
            if now >= stamped.expiry_time {
                stamped.expired_signaled = true;
            }
        }
    }

    pub fn is_past_halfway(&self, id: &str, now: SystemTime) -> Option<bool> {
        self.maps.get(id).map(|s| now >= s.halfway_time)
    }

    /// Computes the aggregate action at `point` as of `now`: the worst-case combination across
    /// every map that defines the point, with higher-priority maps dominating lower-priority ones
    /// whenever the higher-priority map's effective action is not `Continue`.
    pub fn aggregate_action(&self, point: ControlPoint, now: SystemTime) -> Action {
        let mut contributions: Vec<(i8, Action)> = Vec::new();
        for stamped in self.maps.values() {
            let Some(entry) = stamped.map.entry_for(point) else {
                continue;
            };
            let expired = Self::is_expired(stamped, now);
            let effective = if expired {
                entry.on_map_expire.into()
            } else {
                entry.action
            };
            contributions.push((stamped.map.priority, effective));
        }

        if contributions.is_empty() {
            return Action::Continue;
        }

        let max_priority = contributions.iter().map(|(p, _)| *p).max().unwrap();
        let dominant: Vec<Action> = contributions
            .iter()
            .filter(|(p, a)| *p == max_priority && *a != Action::Continue)
            .map(|(_, a)| *a)
            .collect();
        if dominant.is_empty() {
            // No higher-priority map gave a definitive answer; fall back to the full set so a
            // lower-priority map can still veto with Fail/Pause/ForceContinue.
            let all: Vec<Action> = contributions.iter().map(|(_, a)| *a).collect();
            combine(&all)
        } else {
            combine(&dominant)
        }
    }
}

fn combine(actions: &[Action]) -> Action {
    if actions.iter().any(|a| *a == Action::Fail) {
        Action::Fail
    } else if actions.iter().any(|a| *a == Action::Pause) {
        Action::Pause
    } else if actions.iter().any(|a| *a == Action::ForceContinue) {
        Action::ForceContinue
    } else {
        Action::Continue
    }
}
