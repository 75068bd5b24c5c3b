use argh::FromArgs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/device-update.toml";

/// Device-side software update engine.
#[derive(FromArgs, PartialEq, Debug)]
pub struct Arguments {
    /// path to the TOML configuration file
    #[argh(option, default = "PathBuf::from(DEFAULT_CONFIG_PATH)", short = 'c')]
    pub config: PathBuf,

    /// increase log verbosity; repeat for more (e.g. -vv)
    #[argh(switch, short = 'v')]
    pub verbose: u8,

    /// suppress all logging below error level
    #[argh(switch, short = 'q')]
    pub quiet: bool,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Command {
    Run(RunArgs),
    Check(CheckArgs),
    Install(InstallArgs),
}

/// Run the state machine continuously, polling for updates and driving them to completion.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "run")]
pub struct RunArgs {}

/// Poll once for a pending update and exit; does not fetch or install anything.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "check")]
pub struct CheckArgs {}

/// Install a locally available artifact file outside the managed deployment flow, bypassing the
/// `update-check`/`update-fetch` states but still going through install, commit, and the control
/// points that guard them.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "install")]
pub struct InstallArgs {
    /// path to the artifact file to install
    #[argh(positional)]
    pub artifact_path: PathBuf,
}
