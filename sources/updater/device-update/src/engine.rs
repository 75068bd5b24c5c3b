use crate::config::Config;
use crate::error::{self, Result};
use crate::state::{
    failure_transition, happy_path_next, ControlPointWaivers, FailureClass, State, StateData,
    UpdateInfo, MAX_STATE_DATA_STORE_COUNT,
};
use checksum::PublicKey;
use control_map::{Action, ControlMap, ControlPoint, Pool};
use deployment_client::{Authenticator, DeploymentCheckResponse, StatusReport};
use log::{info, warn};
use reqwest::blocking::Client;
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use update_datastore::Datastore;
use update_module::{Capability, OfferedFile, PayloadMeta, PayloadTree, UpdateModule};

/// The three points the runner consults the control-map pool before crossing.
fn control_point_for(state: State) -> Option<ControlPoint> {
    match state {
        State::UpdateInstall => Some(ControlPoint::ArtifactInstallEnter),
        State::Reboot => Some(ControlPoint::ArtifactRebootEnter),
        State::UpdateCommit => Some(ControlPoint::ArtifactCommitEnter),
        _ => None,
    }
}

/// How long the runner parks between re-consulting the control-map pool while paused.
const PAUSE_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One iteration of the state machine: persist the upcoming state, consult any control point
/// guarding it, run the state's action (via `run_state`), and compute the next state from the
/// action's outcome. Calling code drives this in a loop until `State::Finished`/`State::Idle`
/// with no update in progress, or a shutdown request is observed.
pub struct Runner<'a> {
    datastore: &'a Datastore,
    control_maps: &'a mut Pool,
    shutdown: Arc<AtomicBool>,
}

/// What a state's action reported back to the runner.
pub enum Outcome {
    /// Continue to the happy-path successor.
    Advance,
    /// An update was found during `UpdateCheck`; carries the update's metadata onward.
    UpdateFound(UpdateInfo),
    /// No update was found during `UpdateCheck`; return to `Idle`.
    NoUpdateFound,
    /// The state failed; route through `failure_transition`.
    Failed(FailureClass),
}

impl<'a> Runner<'a> {
    pub fn new(datastore: &'a Datastore, control_maps: &'a mut Pool, shutdown: Arc<AtomicBool>) -> Self {
        Runner {
            datastore,
            control_maps,
            shutdown,
        }
    }

    /// Writes `StateData` for `next` transactionally, incrementing the loop-breaker counter.
    /// Returns the freshly persisted `StateData` on success, or
    /// `MaximumStateDataStoreCountExceeded` if the counter would exceed its ceiling.
    pub fn persist_transition(
        &self,
        next: State,
        info: Option<UpdateInfo>,
        waivers: ControlPointWaivers,
    ) -> Result<StateData> {
        let previous_count = self
            .datastore
            .read_transaction(|txn| {
                Ok(txn
                    .read_json::<StateData>(update_datastore::keys::STATE)?
                    .map(|d| d.state_data_store_count)
                    .unwrap_or(0))
            })
            .map_err(|source| error::Error::Datastore { source })?;

        let count = previous_count + 1;
        ensure!(
            count <= MAX_STATE_DATA_STORE_COUNT,
            error::MaximumStateDataStoreCountExceededSnafu {
                max: MAX_STATE_DATA_STORE_COUNT,
            }
        );

        let data = StateData {
            state_name: next,
            update_info: info,
            state_data_store_count: count,
            waivers,
        };
        self.datastore
            .write_transaction(|txn| {
                txn.write_json(update_datastore::keys::STATE, &data)?;
                Ok(())
            })
            .map_err(|source| error::Error::Datastore { source })?;
        Ok(data)
    }

    /// Reads the resume point after a restart: `state-uncommitted` if a schema bump left one
    /// pending, else `state`.
    pub fn resume_point(&self) -> Result<Option<StateData>> {
        self.datastore
            .read_transaction(|txn| {
                if let Some(uncommitted) =
                    txn.read_json::<StateData>(update_datastore::keys::STATE_UNCOMMITTED)?
                {
                    return Ok(Some(uncommitted));
                }
                txn.read_json::<StateData>(update_datastore::keys::STATE)
            })
            .map_err(|source| error::Error::Datastore { source })
    }

    /// Writes `StateData` for `next` under `standalone-state-data`, the key the standalone install
    /// CLI path uses so its progress survives a restart independently of a server-managed
    /// deployment's `state`/`state-uncommitted`.
    pub fn persist_standalone_transition(
        &self,
        next: State,
        info: Option<UpdateInfo>,
        waivers: ControlPointWaivers,
    ) -> Result<StateData> {
        let previous_count = self
            .datastore
            .read_transaction(|txn| {
                Ok(txn
                    .read_json::<StateData>(update_datastore::keys::STANDALONE_STATE_DATA)?
                    .map(|d| d.state_data_store_count)
                    .unwrap_or(0))
            })
            .map_err(|source| error::Error::Datastore { source })?;

        let count = previous_count + 1;
        ensure!(
            count <= MAX_STATE_DATA_STORE_COUNT,
            error::MaximumStateDataStoreCountExceededSnafu {
                max: MAX_STATE_DATA_STORE_COUNT,
            }
        );

        let data = StateData {
            state_name: next,
            update_info: info,
            state_data_store_count: count,
            waivers,
        };
        self.datastore
            .write_transaction(|txn| {
                txn.write_json(update_datastore::keys::STANDALONE_STATE_DATA, &data)?;
                Ok(())
            })
            .map_err(|source| error::Error::Datastore { source })?;
        Ok(data)
    }

    /// Reads the standalone install path's resume point, independent of any server-managed
    /// deployment's state.
    pub fn resume_standalone_point(&self) -> Result<Option<StateData>> {
        self.datastore
            .read_transaction(|txn| {
                txn.read_json::<StateData>(update_datastore::keys::STANDALONE_STATE_DATA)
            })
            .map_err(|source| error::Error::Datastore { source })
    }

    /// Clears the standalone install path's persisted state once it reaches `Finished`, so a
    /// later `install` invocation starts fresh rather than resuming a completed run.
    pub fn clear_standalone_point(&self) -> Result<()> {
        self.datastore
            .write_transaction(|txn| txn.remove(update_datastore::keys::STANDALONE_STATE_DATA))
            .map_err(|source| error::Error::Datastore { source })
    }

    /// Inserts every control map discovered during a check or fetch into the pool, each stamped
    /// with `ttl` from now. A map whose ID is already present is left alone and logged rather than
    /// erroring the whole update over one rejected map.
    pub fn ingest_control_maps(&mut self, maps: Vec<ControlMap>, ttl: Duration) {
        let now = SystemTime::now();
        for map in maps {
            let id = map.id.clone();
            if let Err(e) = self.control_maps.insert(map, now, ttl) {
                warn!("discarding control map {id}: {e}");
            }
        }
    }

    /// Blocks until the aggregate control-map action at `point` is no longer `Pause`, returning
    /// the terminal (non-pause) action. Re-polls at a fixed interval and bails out early if a
    /// shutdown was requested.
    fn await_control_point(&mut self, point: ControlPoint) -> Action {
        loop {
            let action = self.control_maps.aggregate_action(point, SystemTime::now());
            if !matches!(action, Action::Pause) || crate::signals::requested(&self.shutdown) {
                return action;
            }
            info!("control point {point:?} is paused; re-checking in {PAUSE_RECHECK_INTERVAL:?}");
            std::thread::sleep(PAUSE_RECHECK_INTERVAL);
            self.control_maps.mark_expired_as_of(SystemTime::now());
        }
    }

    /// Determines the next state given `current`'s outcome, consulting the control-map pool
    /// first if `current` guards one of the three control points (unless already waived).
    pub fn next_state(
        &mut self,
        current: State,
        outcome: Outcome,
        info: Option<&UpdateInfo>,
        waivers: &mut ControlPointWaivers,
    ) -> State {
        if let Outcome::Failed(class) = outcome {
            return failure_transition(current, class);
        }

        if let Some(point) = control_point_for(current) {
            let already_waived = match point {
                ControlPoint::ArtifactInstallEnter => waivers.install_waived,
                ControlPoint::ArtifactRebootEnter => waivers.reboot_waived,
                ControlPoint::ArtifactCommitEnter => waivers.commit_waived,
            };
            if !already_waived {
                match self.await_control_point(point) {
                    Action::Fail => return State::Error,
                    Action::ForceContinue => match point {
                        ControlPoint::ArtifactInstallEnter => waivers.install_waived = true,
                        ControlPoint::ArtifactRebootEnter => waivers.reboot_waived = true,
                        ControlPoint::ArtifactCommitEnter => waivers.commit_waived = true,
                    },
                    Action::Continue | Action::Pause => {}
                }
            }
        }

        match outcome {
            Outcome::UpdateFound(_) => State::UpdateFetch,
            Outcome::NoUpdateFound => State::Idle,
            Outcome::Advance => happy_path_next(current, info).unwrap_or_else(|| {
                warn!("no happy-path successor defined for {current:?}; staying put");
                current
            }),
            Outcome::Failed(_) => unreachable!("handled above"),
        }
    }
}

/// Collaborators a state's action needs beyond what `Runner` already tracks: the HTTP client and
/// authenticator for talking to the deployments service, the device's own identity, and the
/// verification keys trusted for incoming artifacts.
pub struct EngineContext<'a> {
    pub config: &'a Config,
    pub client: Client,
    pub auth: &'a dyn Authenticator,
    pub verification_keys: Vec<PublicKey>,
    pub datastore: &'a Datastore,
}

/// Resolves the module executable for `payload_type` under `config.module_dir`.
fn module_for(config: &Config, payload_type: &str) -> UpdateModule {
    UpdateModule::new(
        config.module_dir.join(payload_type),
        config.module_timeout(),
    )
}

/// What polling the deployments service determined: the check's own outcome, plus any control
/// maps the server delivered alongside the response for the caller to feed into the pool.
pub struct CheckResult {
    pub outcome: Outcome,
    pub control_maps: Vec<ControlMap>,
}

/// Polls the deployments service for a pending update; the outcome is `Outcome::UpdateFound` or
/// `Outcome::NoUpdateFound`. `reboot_requested`/`rollback_supported` aren't known yet -- they're
/// determined per payload module during `fetch_update`. Control maps arriving with this response
/// are returned alongside rather than inserted here, since insertion needs the running `Pool` the
/// caller's `Runner` owns.
pub fn update_check(ctx: &EngineContext<'_>) -> Result<CheckResult> {
    let found: Option<DeploymentCheckResponse> = deployment_client::check_for_update(
        &ctx.client,
        &ctx.config.server_url,
        &ctx.config.device_type,
        ctx.auth,
    )
    .map_err(|source| error::Error::DeploymentClient { source })?;

    let control_maps = found
        .as_ref()
        .map(|d| d.control_maps.clone())
        .unwrap_or_default();
    let outcome = match found {
        None => Outcome::NoUpdateFound,
        Some(d) => Outcome::UpdateFound(UpdateInfo {
            deployment_id: d.deployment_id,
            artifact_name: d.artifact_name,
            artifact_group: d.artifact_group,
            artifact_url: d.artifact_url,
            provides: BTreeMap::new(),
            clears_artifact_provides: Vec::new(),
            reboot_requested: false,
            rollback_supported: false,
            deployment_aborted: false,
            payloads: Vec::new(),
        }),
    };
    Ok(CheckResult {
        outcome,
        control_maps,
    })
}

/// What fetching an artifact determined: the payloads laid out for later capability invocations,
/// whether any payload's module asked for a reboot or declared rollback support, and the combined
/// provides this artifact will write to the datastore on commit.
pub struct FetchResult {
    pub payloads: Vec<crate::state::PayloadRef>,
    pub reboot_requested: bool,
    pub rollback_supported: bool,
    pub provides: BTreeMap<String, String>,
    pub clears_artifact_provides: Vec<String>,
}

/// Parses an already-downloaded artifact from `source`, lays out one `PayloadTree` per payload
/// under `ctx.config.work_dir`, offers each payload's files to its module via the download
/// protocol, then runs `Prepare` and queries `NeedsRestart`/`SupportsRollback`. A reboot is
/// requested if any payload's module asks for one; rollback is only reported supported if every
/// payload's module agrees. Each payload's `type-info.artifact_provides` is merged into the
/// returned provides map (later payloads win on key collision); `clears_artifact_provides` is the
/// header's list followed by every payload's own list, in artifact order.
fn lay_out_and_prepare_payloads(
    ctx: &EngineContext<'_>,
    source: File,
    content_dir: &Path,
    names: Option<(&str, Option<&str>)>,
) -> Result<(FetchResult, artifact_reader::HeaderInfo)> {
    let content_dir_for_sink = content_dir.to_path_buf();
    let parsed = artifact_reader::read_artifact(source, &ctx.verification_keys, |payload, name, reader| {
        let dest = content_dir_for_sink.join(format!("{payload:04}")).join(name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&dest)?;
        std::io::copy(reader, &mut file)?;
        Ok(())
    })
    .map_err(|source| error::Error::Artifact { source })?;

    let owned_name;
    let (artifact_name, artifact_group): (&str, Option<&str>) = match names {
        Some((name, group)) => (name, group),
        None => {
            owned_name = parsed.header.artifact_provides.artifact_name.clone();
            (&owned_name, parsed.header.artifact_provides.artifact_group.as_deref())
        }
    };

    let mut payloads = Vec::with_capacity(parsed.payloads.len());
    let mut reboot_requested = false;
    let mut rollback_supported = true;
    let mut provides = BTreeMap::new();
    let mut clears_artifact_provides = parsed.header.clears_artifact_provides.clone();
    for payload in &parsed.payloads {
        let payload_dir = content_dir.join(format!("{:04}", payload.index));
        let files: Vec<PathBuf> = if payload_dir.is_dir() {
            fs::read_dir(&payload_dir)
                .context(error::ArtifactWriteSnafu {
                    path: payload_dir.clone(),
                })?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect()
        } else {
            Vec::new()
        };
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let offered: Vec<OfferedFile<'_>> = files
            .iter()
            .zip(names.iter())
            .map(|(path, name)| OfferedFile { name, path })
            .collect();

        let type_info_bytes = serde_json::to_vec(&payload.type_info).unwrap_or_default();
        let header_info_bytes = serde_json::to_vec(&parsed.header).unwrap_or_default();
        let meta = PayloadMeta {
            artifact_name,
            artifact_group,
            device_type: &ctx.config.device_type,
            payload_type: &payload.type_info.payload_type,
            header_info: &header_info_bytes,
            type_info: &type_info_bytes,
            meta_data: payload.meta_data.as_deref(),
        };
        let tree = PayloadTree::create(&ctx.config.work_dir, payload.index, &meta)
            .map_err(|source| error::Error::UpdateModule { source })?;
        let module = module_for(ctx.config, &payload.type_info.payload_type);
        module
            .download(&tree, &offered)
            .map_err(|source| error::Error::UpdateModule { source })?;

        module
            .invoke(Capability::Prepare, &tree)
            .map_err(|source| error::Error::UpdateModule { source })?;
        let needs_restart = module
            .query(Capability::NeedsRestart, &tree)
            .map_err(|source| error::Error::UpdateModule { source })?;
        let supports_rollback = module
            .query(Capability::SupportsRollback, &tree)
            .map_err(|source| error::Error::UpdateModule { source })?;
        reboot_requested |= needs_restart;
        rollback_supported &= supports_rollback;
        provides.extend(payload.type_info.artifact_provides.clone());
        clears_artifact_provides.extend(payload.type_info.clears_artifact_provides.iter().cloned());

        payloads.push(crate::state::PayloadRef {
            index: payload.index,
            payload_type: payload.type_info.payload_type.clone(),
        });
    }

    Ok((
        FetchResult {
            payloads,
            reboot_requested,
            rollback_supported,
            provides,
            clears_artifact_provides,
        },
        parsed.header,
    ))
}

/// Downloads the artifact named in `info.artifact_url` to `work_dir/tmp/artifact`, verifies and
/// parses it, and lays out/prepares every payload. Returns each payload's index and type, for
/// later capability invocations (install/commit/rollback) against the same trees, plus whether a
/// reboot or rollback is supported.
pub fn fetch_update(ctx: &EngineContext<'_>, info: &UpdateInfo) -> Result<FetchResult> {
    let tmp_dir = ctx.config.work_dir.join("tmp");
    fs::create_dir_all(&tmp_dir).ok();
    let archive_path = tmp_dir.join("artifact");

    let mut response = ctx
        .client
        .get(&info.artifact_url)
        .send()
        .and_then(|r| r.error_for_status())
        .context(error::ArtifactDownloadSnafu {
            url: info.artifact_url.clone(),
        })?;
    let mut out = File::create(&archive_path).context(error::ArtifactWriteSnafu {
        path: archive_path.clone(),
    })?;
    std::io::copy(&mut response, &mut out).context(error::ArtifactWriteSnafu {
        path: archive_path.clone(),
    })?;
    drop(out);

    let content_dir = tmp_dir.join("content");
    fs::create_dir_all(&content_dir).ok();

    let source = File::open(&archive_path).context(error::ArtifactWriteSnafu {
        path: archive_path.clone(),
    })?;
    let (result, _header) = lay_out_and_prepare_payloads(
        ctx,
        source,
        &content_dir,
        Some((&info.artifact_name, info.artifact_group.as_deref())),
    )?;
    Ok(result)
}

/// Reads a locally available artifact file (bypassing the deployments service entirely) and
/// builds a complete `UpdateInfo` for it, for the standalone install CLI path. The artifact's own
/// `artifact-provides` supplies the name/group that would otherwise come from the server.
pub fn fetch_local_artifact(ctx: &EngineContext<'_>, artifact_path: &Path) -> Result<UpdateInfo> {
    let tmp_dir = ctx.config.work_dir.join("tmp-standalone");
    fs::create_dir_all(&tmp_dir).ok();
    let content_dir = tmp_dir.join("content");
    fs::create_dir_all(&content_dir).ok();

    let source = File::open(artifact_path).context(error::ArtifactWriteSnafu {
        path: artifact_path.to_path_buf(),
    })?;
    let (result, header) = lay_out_and_prepare_payloads(ctx, source, &content_dir, None)?;

    Ok(UpdateInfo {
        deployment_id: "standalone".to_string(),
        artifact_name: header.artifact_provides.artifact_name,
        artifact_group: header.artifact_provides.artifact_group,
        artifact_url: artifact_path.to_string_lossy().into_owned(),
        provides: result.provides,
        clears_artifact_provides: result.clears_artifact_provides,
        reboot_requested: result.reboot_requested,
        rollback_supported: result.rollback_supported,
        deployment_aborted: false,
        payloads: result.payloads,
    })
}

/// Invokes `capability` against every payload laid out under `work_dir` by an earlier
/// `fetch_update` call in this same update, stopping at the first failure.
pub fn invoke_all_payloads(
    ctx: &EngineContext<'_>,
    payloads: &[crate::state::PayloadRef],
    capability: Capability,
) -> Result<()> {
    for payload in payloads {
        let tree = PayloadTree::open(&ctx.config.work_dir, payload.index);
        let module = module_for(ctx.config, &payload.payload_type);
        module
            .invoke(capability, &tree)
            .map_err(|source| error::Error::UpdateModule { source })?;
    }
    Ok(())
}

/// Writes `info`'s artifact name, group, and merged provides to the datastore, per the
/// clear/merge rule in `update_datastore::commit_artifact_data`. Called once `update-commit`'s
/// modules have all reported success; never called on the rollback path, so a rolled-back
/// deployment leaves the pre-deployment provides untouched.
pub fn commit_artifact_data(ctx: &EngineContext<'_>, info: &UpdateInfo) -> Result<()> {
    ctx.datastore
        .write_transaction(|txn| {
            update_datastore::commit_artifact_data(
                txn,
                &info.artifact_name,
                info.artifact_group.as_deref(),
                &info.provides,
                &info.clears_artifact_provides,
            )
        })
        .map_err(|source| error::Error::Datastore { source })
}

/// Uploads a short summary of a failed deployment's outcome to the deployments service's log
/// endpoint, invoked when a deployment reaches `update-error`.
pub fn upload_error_log(ctx: &EngineContext<'_>, info: &UpdateInfo) -> Result<()> {
    let message = format!(
        "deployment {} ({}) failed and was not recovered",
        info.deployment_id, info.artifact_name
    );
    deployment_client::upload_log(
        &ctx.client,
        &ctx.config.server_url,
        &info.deployment_id,
        &message,
        ctx.auth,
    )
    .map_err(|source| error::Error::DeploymentClient { source })
}

/// Reports the final outcome of an update to the deployments service.
pub fn report_final_status(
    ctx: &EngineContext<'_>,
    info: &UpdateInfo,
    status: &str,
    substate: Option<&str>,
) -> Result<()> {
    deployment_client::report_status(
        &ctx.client,
        &ctx.config.server_url,
        &info.deployment_id,
        &StatusReport { status, substate },
        ctx.auth,
    )
    .map_err(|source| error::Error::DeploymentClient { source })
}
