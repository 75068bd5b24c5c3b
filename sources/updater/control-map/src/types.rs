use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::path::Path;

/// The effective behavior a control map requests at a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Continue,
    ForceContinue,
    Pause,
    Fail,
}

impl Default for Action {
    fn default() -> Self {
        Action::Continue
    }
}

/// One of the three points in the state machine a control map can govern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ControlPoint {
    #[serde(rename = "ArtifactInstall_Enter")]
    ArtifactInstallEnter,
    #[serde(rename = "ArtifactReboot_Enter")]
    ArtifactRebootEnter,
    #[serde(rename = "ArtifactCommit_Enter")]
    ArtifactCommitEnter,
}

impl ControlPoint {
    pub const ALL: [ControlPoint; 3] = [
        ControlPoint::ArtifactInstallEnter,
        ControlPoint::ArtifactRebootEnter,
        ControlPoint::ArtifactCommitEnter,
    ];

    fn wire_name(self) -> &'static str {
        match self {
            ControlPoint::ArtifactInstallEnter => "ArtifactInstall_Enter",
            ControlPoint::ArtifactRebootEnter => "ArtifactReboot_Enter",
            ControlPoint::ArtifactCommitEnter => "ArtifactCommit_Enter",
        }
    }

    fn parse(state: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cp| cp.wire_name() == state)
    }
}

/// The expiry fallback a control map can request. Narrower than `Action`: a map that asked to
/// `pause` forever past its own expiry would never resolve to a terminal action, so `pause` is not
/// a member of this domain -- a wire value of `"pause"` is a parse error, not a silent downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireAction {
    Continue,
    ForceContinue,
    Fail,
}

impl From<ExpireAction> for Action {
    fn from(value: ExpireAction) -> Self {
        match value {
            ExpireAction::Continue => Action::Continue,
            ExpireAction::ForceContinue => Action::ForceContinue,
            ExpireAction::Fail => Action::Fail,
        }
    }
}

/// As authored on the wire: every field optional. Missing fields take defaults that depend on
/// `action`, computed in `TryFrom` below rather than per-field `#[serde(default)]`.
#[derive(Debug, Clone, Copy, Deserialize)]
struct WireStateEntry {
    action: Option<Action>,
    on_map_expire: Option<ExpireAction>,
    on_action_executed: Option<Action>,
}

/// What a map requests for one control point: the current action, what to fall back to once the
/// map expires, and the action to record once `action` has been carried out. `on_action_executed`
/// is informational -- the aggregate rule never consults it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "WireStateEntry")]
pub struct StateEntry {
    pub action: Action,
    pub on_map_expire: ExpireAction,
    pub on_action_executed: Action,
}

impl TryFrom<WireStateEntry> for StateEntry {
    type Error = error::Error;

    fn try_from(wire: WireStateEntry) -> Result<Self> {
        let action = wire.action.unwrap_or(Action::Continue);
        let on_map_expire = wire.on_map_expire.unwrap_or(match action {
            Action::Pause => ExpireAction::Fail,
            Action::Continue => ExpireAction::Continue,
            Action::ForceContinue => ExpireAction::ForceContinue,
            Action::Fail => ExpireAction::Fail,
        });
        let on_action_executed = wire.on_action_executed.unwrap_or(action);
        Ok(StateEntry {
            action,
            on_map_expire,
            on_action_executed,
        })
    }
}

impl StateEntry {
    fn is_all_default(&self) -> bool {
        self.action == Action::Continue
            && self.on_map_expire == ExpireAction::Continue
            && self.on_action_executed == Action::Continue
    }
}

/// A single control map as authored: governs zero or more control points, each with an action
/// and an expiry fallback, scoped to one payload update by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMap {
    pub id: String,
    #[serde(default)]
    pub priority: i8,
    pub states: BTreeMap<String, StateEntry>,
}

impl ControlMap {
    /// Validates ID format, priority range, state keys, and action values, returning a sanitized
    /// copy with all-default states dropped.
    pub fn validate(self) -> Result<Self> {
        ensure!(is_valid_uuid(&self.id), error::InvalidIdSnafu { id: &self.id });
        ensure!(
            (-10..=10).contains(&self.priority),
            error::InvalidPrioritySnafu {
                id: &self.id,
                priority: self.priority,
            }
        );
        for state in self.states.keys() {
            ensure!(
                ControlPoint::parse(state).is_some(),
                error::InvalidStateKeySnafu {
                    id: &self.id,
                    state: state.clone(),
                }
            );
        }

        let states = self
            .states
            .into_iter()
            .filter(|(_, entry)| !entry.is_all_default())
            .collect();

        Ok(ControlMap {
            id: self.id,
            priority: self.priority,
            states,
        })
    }

    pub fn entry_for(&self, point: ControlPoint) -> Option<&StateEntry> {
        self.states.get(point.wire_name())
    }
}

/// Reads a control map document from `path`. Does not validate; callers that will act on the
/// result should call `validate()` afterward.
pub fn load_file(path: &Path) -> Result<ControlMap> {
    let file = File::open(path).context(error::MapReadSnafu { path })?;
    serde_json::from_reader(file).context(error::MapParseSnafu { path })
}

/// Writes `map` to `path` as pretty-printed JSON.
pub fn write_file(path: &Path, map: &ControlMap) -> Result<()> {
    let body = serde_json::to_string_pretty(map).context(error::MapSerializeSnafu)?;
    fs::write(path, body).context(error::MapWriteSnafu { path })?;
    Ok(())
}

/// Validates `id` as a canonical lowercase UUID: 36 characters, hyphens at positions 8/13/18/23,
/// lowercase hex elsewhere.
pub fn is_valid_uuid(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        let expect_hyphen = matches!(i, 8 | 13 | 18 | 23);
        if expect_hyphen {
            if *b != b'-' {
                return false;
            }
        } else if !(b.is_ascii_digit() || (b'a'..=b'f').contains(b)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_uuid_accepted() {
        assert!(is_valid_uuid("9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f"));
    }

    #[test]
    fn uppercase_uuid_rejected() {
        assert!(!is_valid_uuid("9C858F83-4B71-4B1E-9D2B-5A6B7C8D9E0F"));
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(!is_valid_uuid("not-a-uuid"));
    }

    #[test]
    fn validate_rejects_bad_priority() {
        let map = ControlMap {
            id: "9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f".to_string(),
            priority: 11,
            states: BTreeMap::new(),
        };
        assert!(matches!(
            map.validate(),
            Err(error::Error::InvalidPriority { .. })
        ));
    }

    #[test]
    fn validate_drops_all_default_states() {
        let mut states = BTreeMap::new();
        states.insert(
            "ArtifactInstall_Enter".to_string(),
            StateEntry {
                action: Action::Continue,
                on_map_expire: ExpireAction::Continue,
                on_action_executed: Action::Continue,
            },
        );
        states.insert(
            "ArtifactReboot_Enter".to_string(),
            StateEntry {
                action: Action::Pause,
                on_map_expire: ExpireAction::Fail,
                on_action_executed: Action::Pause,
            },
        );
        let map = ControlMap {
            id: "9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f".to_string(),
            priority: 0,
            states,
        }
        .validate()
        .unwrap();
        assert_eq!(map.states.len(), 1);
        assert!(map.states.contains_key("ArtifactReboot_Enter"));
    }

    #[test]
    fn validate_rejects_unknown_state_key() {
        let mut states = BTreeMap::new();
        states.insert(
            "NotAControlPoint".to_string(),
            StateEntry {
                action: Action::Pause,
                on_map_expire: ExpireAction::Fail,
                on_action_executed: Action::Pause,
            },
        );
        let map = ControlMap {
            id: "9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f".to_string(),
            priority: 0,
            states,
        };
        assert!(matches!(
            map.validate(),
            Err(error::Error::InvalidStateKey { .. })
        ));
    }

    #[test]
    fn paused_state_with_no_explicit_on_map_expire_defaults_to_fail() {
        let entry: StateEntry = serde_json::from_str(r#"{"action":"pause"}"#).unwrap();
        assert_eq!(entry.action, Action::Pause);
        assert_eq!(entry.on_map_expire, ExpireAction::Fail);
        assert_eq!(entry.on_action_executed, Action::Pause);
    }

    #[test]
    fn non_pause_state_defaults_on_map_expire_to_its_own_action() {
        let entry: StateEntry = serde_json::from_str(r#"{"action":"force_continue"}"#).unwrap();
        assert_eq!(entry.on_map_expire, ExpireAction::ForceContinue);
    }

    #[test]
    fn on_map_expire_rejects_pause() {
        let result: std::result::Result<StateEntry, _> =
            serde_json::from_str(r#"{"action":"pause","on_map_expire":"pause"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_on_action_executed_is_preserved() {
        let entry: StateEntry =
            serde_json::from_str(r#"{"action":"continue","on_action_executed":"fail"}"#).unwrap();
        assert_eq!(entry.on_action_executed, Action::Fail);
    }
}
