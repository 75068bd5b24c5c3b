use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every state the runner can persist as `state`/`state-uncommitted`. Variant names are
/// kebab-cased on the wire and must stay exactly as listed here -- they're read back verbatim
/// after a reboot to resume the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Init,
    Idle,
    Authorize,
    AuthorizeWait,
    InventoryUpdate,
    CheckWait,
    UpdateCheck,
    UpdateFetch,
    UpdateStore,
    UpdateAfterStore,
    UpdateInstall,
    FetchInstallRetryWait,
    UpdateVerify,
    UpdateCommit,
    UpdatePreCommitStatusReportRetry,
    UpdateAfterFirstCommit,
    UpdateAfterCommit,
    UpdateStatusReport,
    UpdateRetryReport,
    StatusReportError,
    Reboot,
    VerifyReboot,
    AfterReboot,
    Rollback,
    RollbackReboot,
    VerifyRollbackReboot,
    AfterRollbackReboot,
    Error,
    UpdateError,
    Cleanup,
    Finished,
}

/// Which payload requested a reboot, and whether a prior control-map `force_continue` already
/// waived further checks for it -- consulted so the runner doesn't re-prompt for the same payload
/// at every control point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPointWaivers {
    #[serde(default)]
    pub install_waived: bool,
    #[serde(default)]
    pub reboot_waived: bool,
    #[serde(default)]
    pub commit_waived: bool,
}

/// One payload laid out under the work directory by `UpdateFetch`, referenced again at
/// install/commit/rollback time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadRef {
    pub index: u32,
    pub payload_type: String,
}

/// Information about the update carried across every persisted state transition: which
/// deployment this is, its artifact metadata, and whether a reboot / rollback-with-reboot was
/// requested by the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub deployment_id: String,
    pub artifact_name: String,
    pub artifact_group: Option<String>,
    #[serde(default)]
    pub artifact_url: String,
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
    #[serde(default)]
    pub clears_artifact_provides: Vec<String>,
    #[serde(default)]
    pub reboot_requested: bool,
    #[serde(default)]
    pub rollback_supported: bool,
    #[serde(default)]
    pub deployment_aborted: bool,
    #[serde(default)]
    pub payloads: Vec<PayloadRef>,
}

/// Persisted once per state transition: the state being entered, the update this transition
/// belongs to, and a running count used as the loop breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateData {
    pub state_name: State,
    pub update_info: Option<UpdateInfo>,
    pub state_data_store_count: u32,
    #[serde(default)]
    pub waivers: ControlPointWaivers,
}

/// `state_data_store_count` ceiling: past this many transitions for one update, the runner treats
/// it as stuck in a loop and forces entry into the error branch.
pub const MAX_STATE_DATA_STORE_COUNT: u32 = 70;

/// How a failed state's error should be routed, classified by the engine rather than the
/// individual state action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network or resource contention: retry with backoff rather than rolling back immediately.
    Transient,
    /// Checksum/signature mismatch, unsupported version, or device incompatibility: the update
    /// itself is bad, go straight to rollback.
    Fatal,
    /// The server rejected the deployment (HTTP 409): roll back and tag the deployment aborted.
    Abort,
}

/// The non-error successor of `state`, ignoring failure branches (see `failure_transition`).
pub fn happy_path_next(state: State, info: Option<&UpdateInfo>) -> Option<State> {
    use State::*;
    Some(match state {
        Init => Idle,
        Idle => CheckWait,
        CheckWait => UpdateCheck,
        // UpdateCheck's next state depends on whether an update was found; the runner decides
        // between Idle and UpdateFetch itself rather than this table.
        UpdateCheck => return None,
        FetchInstallRetryWait => UpdateFetch,
        UpdateFetch => UpdateStore,
        UpdateStore => UpdateAfterStore,
        UpdateAfterStore => UpdateInstall,
        UpdateInstall => {
            if info.map(|i| i.reboot_requested).unwrap_or(false) {
                Reboot
            } else {
                UpdateCommit
            }
        }
        Reboot => VerifyReboot,
        VerifyReboot => AfterReboot,
        AfterReboot => UpdateCommit,
        UpdateCommit => UpdateAfterFirstCommit,
        UpdateAfterFirstCommit => UpdateAfterCommit,
        UpdateAfterCommit => UpdateStatusReport,
        UpdateStatusReport => Cleanup,
        UpdateRetryReport => UpdateStatusReport,
        Cleanup => Idle,
        Rollback => {
            if info.map(|i| i.rollback_supported).unwrap_or(false) {
                RollbackReboot
            } else {
                UpdateError
            }
        }
        RollbackReboot => VerifyRollbackReboot,
        VerifyRollbackReboot => AfterRollbackReboot,
        AfterRollbackReboot => UpdateError,
        UpdateError => Cleanup,
        _ => return None,
    })
}

/// Where a failure in `state` routes to, given its `FailureClass`. Only states between install
/// and commit (where rollback is meaningful) branch to `Rollback`; earlier failures (e.g. during
/// fetch) retry in place or return to `Idle` through the error branch.
pub fn failure_transition(state: State, class: FailureClass) -> State {
    use FailureClass::*;
    use State::*;
    match (state, class) {
        (UpdateStatusReport, Abort) => Rollback,
        (UpdateStatusReport, _) => UpdateRetryReport,
        (UpdateRetryReport, Abort) => Rollback,
        (UpdateFetch | UpdateStore, Transient) => FetchInstallRetryWait,
        (UpdateInstall | UpdateVerify | UpdateCommit | UpdateAfterFirstCommit | UpdateAfterCommit, _) => {
            Rollback
        }
        (_, Fatal) => Error,
        (_, Abort) => Rollback,
        (_, Transient) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_kebab_case_json() {
        let json = serde_json::to_string(&State::FetchInstallRetryWait).unwrap();
        assert_eq!(json, "\"fetch-install-retry-wait\"");
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, State::FetchInstallRetryWait);
    }

    #[test]
    fn all_terminal_names_match_the_documented_set() {
        let names = [
            "init",
            "idle",
            "authorize",
            "authorize-wait",
            "inventory-update",
            "check-wait",
            "update-check",
            "update-fetch",
            "update-store",
            "update-after-store",
            "update-install",
            "fetch-install-retry-wait",
            "update-verify",
            "update-commit",
            "update-pre-commit-status-report-retry",
            "update-after-first-commit",
            "update-after-commit",
            "update-status-report",
            "update-retry-report",
            "status-report-error",
            "reboot",
            "verify-reboot",
            "after-reboot",
            "rollback",
            "rollback-reboot",
            "verify-rollback-reboot",
            "after-rollback-reboot",
            "error",
            "update-error",
            "cleanup",
            "finished",
        ];
        for name in names {
            let state: State = serde_json::from_str(&format!("\"{name}\"")).unwrap_or_else(|e| {
                panic!("state name '{name}' failed to parse: {e}");
            });
            assert_eq!(serde_json::to_string(&state).unwrap(), format!("\"{name}\""));
        }
    }

    #[test]
    fn install_without_reboot_goes_straight_to_commit() {
        let info = UpdateInfo {
            deployment_id: "d1".to_string(),
            artifact_name: "release-1".to_string(),
            artifact_group: None,
            artifact_url: String::new(),
            provides: BTreeMap::new(),
            clears_artifact_provides: vec![],
            reboot_requested: false,
            rollback_supported: true,
            deployment_aborted: false,
            payloads: vec![],
        };
        assert_eq!(
            happy_path_next(State::UpdateInstall, Some(&info)),
            Some(State::UpdateCommit)
        );
    }

    #[test]
    fn install_with_reboot_goes_through_reboot_branch() {
        let info = UpdateInfo {
            deployment_id: "d1".to_string(),
            artifact_name: "release-1".to_string(),
            artifact_group: None,
            artifact_url: String::new(),
            provides: BTreeMap::new(),
            clears_artifact_provides: vec![],
            reboot_requested: true,
            rollback_supported: true,
            deployment_aborted: false,
            payloads: vec![],
        };
        assert_eq!(
            happy_path_next(State::UpdateInstall, Some(&info)),
            Some(State::Reboot)
        );
        assert_eq!(
            happy_path_next(State::Reboot, Some(&info)),
            Some(State::VerifyReboot)
        );
        assert_eq!(
            happy_path_next(State::AfterReboot, Some(&info)),
            Some(State::UpdateCommit)
        );
    }

    #[test]
    fn fatal_failure_during_install_routes_to_rollback() {
        assert_eq!(
            failure_transition(State::UpdateInstall, FailureClass::Fatal),
            State::Rollback
        );
    }

    #[test]
    fn transient_failure_during_fetch_waits_and_retries() {
        assert_eq!(
            failure_transition(State::UpdateFetch, FailureClass::Transient),
            State::FetchInstallRetryWait
        );
    }

    #[test]
    fn server_conflict_during_status_report_short_circuits_to_rollback() {
        assert_eq!(
            failure_transition(State::UpdateStatusReport, FailureClass::Abort),
            State::Rollback
        );
    }

    #[test]
    fn status_report_transient_failure_loops_to_retry_report() {
        assert_eq!(
            failure_transition(State::UpdateStatusReport, FailureClass::Transient),
            State::UpdateRetryReport
        );
    }

    #[test]
    fn retry_wait_states_loop_back_to_the_state_they_guard() {
        assert_eq!(
            happy_path_next(State::FetchInstallRetryWait, None),
            Some(State::UpdateFetch)
        );
        assert_eq!(
            happy_path_next(State::UpdateRetryReport, None),
            Some(State::UpdateStatusReport)
        );
    }
}
