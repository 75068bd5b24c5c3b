use crate::state::State;
use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to read config file '{}': {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse config file '{}': {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("datastore error: {}", source))]
    Datastore { source: update_datastore::error::Error },

    #[snafu(display("artifact error: {}", source))]
    Artifact { source: artifact_reader::error::Error },

    #[snafu(display("failed to load verification key: {}", source))]
    KeyLoad { source: checksum::error::Error },

    #[snafu(display("control map error: {}", source))]
    ControlMap { source: control_map::error::Error },

    #[snafu(display("update module error: {}", source))]
    UpdateModule { source: update_module::error::Error },

    #[snafu(display("deployment client error: {}", source))]
    DeploymentClient { source: deployment_client::error::Error },

    #[snafu(display("failed to download artifact from '{}': {}", url, source))]
    ArtifactDownload { url: String, source: reqwest::Error },

    #[snafu(display("failed to write artifact to '{}': {}", path.display(), source))]
    ArtifactWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "update exceeded {} state transitions without making progress; forcing error branch",
        max
    ))]
    MaximumStateDataStoreCountExceeded { max: u32 },

    #[snafu(display("no update is in progress, but state machine is in '{:?}'", state))]
    NoUpdateInProgress { state: State },

    #[snafu(display("failed to install signal handler: {}", source))]
    SignalHandler { source: std::io::Error },

    #[snafu(display("failed to initialize logging: {}", source))]
    InitLogging { source: log::SetLoggerError },
}
