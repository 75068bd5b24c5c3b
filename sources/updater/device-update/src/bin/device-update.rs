use device_update::cli::{Arguments, Command};
use device_update::config::Config;
use device_update::engine::{EngineContext, Outcome, Runner};
use device_update::error::{self, Result};
use device_update::state::{FailureClass, State};
use device_update::{engine, logging, signals};
use log::{error, info};
use std::fs;
use update_module::Capability;

/// Borrows the in-progress update's metadata, or fails with `NoUpdateInProgress` if a state that
/// requires one is reached without it (should not happen on the happy path; a defensive check
/// against a corrupted resume point).
fn require_info(
    info: &Option<device_update::state::UpdateInfo>,
    state: State,
) -> Result<&device_update::state::UpdateInfo> {
    info.as_ref()
        .ok_or(error::Error::NoUpdateInProgress { state })
}

/// Converts a state action's result into an `Outcome`, classifying errors so `failure_transition`
/// can route them correctly.
fn dispatch<T>(result: Result<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Advance,
        Err(e) => {
            error!("state action failed: {e}");
            Outcome::Failed(classify(&e))
        }
    }
}

fn classify(error: &error::Error) -> FailureClass {
    use error::Error::*;
    match error {
        DeploymentClient {
            source: deployment_client::error::Error::DeploymentAborted,
        } => FailureClass::Abort,
        DeploymentClient {
            source: deployment_client::error::Error::MaxRetriesExceeded,
        } => FailureClass::Fatal,
        Artifact { .. } => FailureClass::Fatal,
        UpdateModule { .. } => FailureClass::Fatal,
        ArtifactDownload { .. } | DeploymentClient { .. } | Datastore { .. } => {
            FailureClass::Transient
        }
        _ => FailureClass::Fatal,
    }
}

fn run(arguments: &Arguments, config: &Config) -> Result<()> {
    let datastore = update_datastore::Datastore::open(&config.datastore_path)
        .map_err(|source| error::Error::Datastore { source })?;
    fs::create_dir_all(&config.work_dir).ok();

    let shutdown = signals::install_shutdown_flag()?;
    let client = deployment_client::build_client(config.module_timeout())
        .map_err(|source| error::Error::DeploymentClient { source })?;
    let verification_keys = config.load_verification_keys()?;

    let mut control_maps = control_map::Pool::new();
    let auth = EnvTokenAuth;
    let ctx = EngineContext {
        config,
        client,
        auth: &auth,
        verification_keys,
        datastore: &datastore,
    };

    let mut runner = Runner::new(&datastore, &mut control_maps, shutdown.clone());
    let mut resume = runner.resume_point()?;
    let mut waivers = resume
        .as_ref()
        .map(|d| d.waivers.clone())
        .unwrap_or_default();
    let mut current = resume
        .take()
        .map(|d| d.state_name)
        .unwrap_or(State::Init);
    let mut info = None;
    // Attempt counters feeding `deployment_client::backoff::interval_for_attempt`. Not persisted:
    // a restart mid-backoff resumes with a fresh schedule rather than remembering how many tries
    // already elapsed.
    let mut fetch_retry_attempt: u32 = 0;
    let mut report_retry_attempt: u32 = 0;

    match &arguments.command {
        Command::Check(_) => {
            let result = engine::update_check(&ctx)?;
            match result.outcome {
                Outcome::UpdateFound(found) => {
                    info!("update available: {}", found.artifact_name)
                }
                _ => info!("no update available"),
            }
            return Ok(());
        }
        Command::Run(_) => {}
        Command::Install(install_args) => {
            return run_standalone_install(&ctx, &mut runner, &install_args.artifact_path);
        }
    }

    loop {
        if signals::requested(&shutdown) {
            info!("shutdown requested; exiting after persisting current state");
            break;
        }
        if matches!(current, State::Finished) {
            info!("update finished");
            break;
        }
        if matches!(current, State::Idle) && info.is_none() {
            // Nothing in progress; the daemon parks here between poll cycles rather than
            // busy-looping through CheckWait on every iteration.
            std::thread::sleep(std::time::Duration::from_secs(60));
        }

        let outcome = match current {
            State::UpdateCheck => {
                let result = engine::update_check(&ctx)?;
                runner.ingest_control_maps(result.control_maps, ctx.config.control_map_ttl());
                result.outcome
            }
            State::UpdateFetch => {
                let outcome = dispatch(
                    engine::fetch_update(&ctx, require_info(&info, current)?).map(|result| {
                        if let Some(i) = info.as_mut() {
                            i.payloads = result.payloads;
                            i.reboot_requested = result.reboot_requested;
                            i.rollback_supported = result.rollback_supported;
                            i.provides = result.provides;
                            i.clears_artifact_provides = result.clears_artifact_provides;
                        }
                    }),
                );
                if matches!(outcome, Outcome::Advance) {
                    fetch_retry_attempt = 0;
                }
                outcome
            }
            State::FetchInstallRetryWait => {
                let outcome = match deployment_client::backoff::interval_for_attempt(
                    fetch_retry_attempt,
                    ctx.config.max_backoff(),
                ) {
                    Ok(interval) => {
                        info!(
                            "transient update-fetch failure; waiting {interval:?} before retrying \
                             (attempt {fetch_retry_attempt})"
                        );
                        std::thread::sleep(interval);
                        Outcome::Advance
                    }
                    Err(source) => dispatch(Err(error::Error::DeploymentClient { source })),
                };
                fetch_retry_attempt += 1;
                outcome
            }
            State::UpdateInstall => dispatch(engine::invoke_all_payloads(
                &ctx,
                &require_info(&info, current)?.payloads,
                Capability::Install,
            )),
            State::UpdateCommit => dispatch((|| {
                let current_info = require_info(&info, current)?;
                engine::invoke_all_payloads(&ctx, &current_info.payloads, Capability::Commit)?;
                engine::commit_artifact_data(&ctx, current_info)
            })()),
            State::Rollback => dispatch(engine::invoke_all_payloads(
                &ctx,
                &require_info(&info, current)?.payloads,
                Capability::Rollback,
            )),
            State::Cleanup => dispatch(engine::invoke_all_payloads(
                &ctx,
                &require_info(&info, current)?.payloads,
                Capability::Cleanup,
            )),
            State::UpdateStatusReport => {
                let outcome = dispatch(engine::report_final_status(
                    &ctx,
                    require_info(&info, current)?,
                    "success",
                    None,
                ));
                if matches!(outcome, Outcome::Advance) {
                    report_retry_attempt = 0;
                }
                outcome
            }
            State::UpdateRetryReport => {
                let outcome = match deployment_client::backoff::interval_for_attempt(
                    report_retry_attempt,
                    ctx.config.max_backoff(),
                ) {
                    Ok(interval) => {
                        info!(
                            "status report failed; waiting {interval:?} before retrying \
                             (attempt {report_retry_attempt})"
                        );
                        std::thread::sleep(interval);
                        Outcome::Advance
                    }
                    Err(source) => dispatch(Err(error::Error::DeploymentClient { source })),
                };
                report_retry_attempt += 1;
                outcome
            }
            State::UpdateError => dispatch((|| {
                let current_info = require_info(&info, current)?;
                engine::report_final_status(&ctx, current_info, "failure", None)?;
                engine::upload_error_log(&ctx, current_info)
            })()),
            _ => Outcome::Advance,
        };

        if let Outcome::UpdateFound(ref found) = outcome {
            info = Some(found.clone());
        }

        let next = runner.next_state(current, outcome, info.as_ref(), &mut waivers);
        let persisted = runner.persist_transition(next, info.clone(), waivers.clone());
        match persisted {
            Ok(_) => {}
            Err(error::Error::MaximumStateDataStoreCountExceeded { max }) => {
                error!("exceeded {max} state transitions without progress; forcing error branch");
                current = State::Error;
                continue;
            }
            Err(e) => return Err(e),
        }
        current = next;
    }

    Ok(())
}

/// Drives a locally available artifact through install/commit (and reboot/rollback if the modules
/// ask for them) without involving the deployments service at all: no `update-check`/`update-fetch`
/// polling, and no status/log reporting, since there's no managed deployment id to report against.
/// Progress is persisted under `standalone-state-data` so a restart resumes this run rather than a
/// server-managed one.
fn run_standalone_install(
    ctx: &EngineContext<'_>,
    runner: &mut Runner<'_>,
    artifact_path: &std::path::Path,
) -> Result<()> {
    let resume = runner.resume_standalone_point()?;
    let (mut current, mut info, mut waivers) = match resume {
        Some(d) => (d.state_name, d.update_info, d.waivers),
        None => {
            let found = engine::fetch_local_artifact(ctx, artifact_path)?;
            info!("prepared standalone install of {}", found.artifact_name);
            (State::UpdateInstall, Some(found), Default::default())
        }
    };

    loop {
        if matches!(current, State::Idle | State::Finished) {
            info!("standalone install finished");
            break;
        }

        let outcome = match current {
            State::UpdateInstall => dispatch(engine::invoke_all_payloads(
                ctx,
                &require_info(&info, current)?.payloads,
                Capability::Install,
            )),
            State::UpdateCommit => dispatch((|| {
                let current_info = require_info(&info, current)?;
                engine::invoke_all_payloads(ctx, &current_info.payloads, Capability::Commit)?;
                engine::commit_artifact_data(ctx, current_info)
            })()),
            State::Rollback => dispatch(engine::invoke_all_payloads(
                ctx,
                &require_info(&info, current)?.payloads,
                Capability::Rollback,
            )),
            State::Cleanup => dispatch(engine::invoke_all_payloads(
                ctx,
                &require_info(&info, current)?.payloads,
                Capability::Cleanup,
            )),
            State::UpdateStatusReport => {
                info!("standalone install succeeded");
                Outcome::Advance
            }
            State::UpdateError => {
                error!("standalone install failed and was not recovered");
                Outcome::Advance
            }
            _ => Outcome::Advance,
        };

        let next = runner.next_state(current, outcome, info.as_ref(), &mut waivers);
        let persisted = runner.persist_standalone_transition(next, info.clone(), waivers.clone());
        match persisted {
            Ok(_) => {}
            Err(error::Error::MaximumStateDataStoreCountExceeded { max }) => {
                error!("exceeded {max} state transitions without progress; forcing error branch");
                current = State::Error;
                continue;
            }
            Err(e) => return Err(e),
        }
        current = next;
    }

    runner.clear_standalone_point()
}

/// Placeholder authenticator until the device's identity/token provisioning is wired in; treats
/// the value of `DEVICE_UPDATE_TOKEN` as a static bearer token with no refresh.
struct EnvTokenAuth;

impl deployment_client::Authenticator for EnvTokenAuth {
    fn token(&self) -> deployment_client::error::Result<String> {
        Ok(std::env::var("DEVICE_UPDATE_TOKEN").unwrap_or_default())
    }
    fn reauthenticate(&self) -> deployment_client::error::Result<String> {
        self.token()
    }
}

fn main_inner() -> Result<()> {
    let arguments: Arguments = argh::from_env();
    logging::init(logging::level_from_verbosity(
        arguments.quiet,
        arguments.verbose,
    ))?;
    let config = Config::from_path(&arguments.config)?;
    run(&arguments, &config)
}

fn main() -> ! {
    std::process::exit(match main_inner() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    })
}
