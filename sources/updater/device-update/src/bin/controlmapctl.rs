use argh::FromArgs;
use control_map::{Action, ControlMap, ExpireAction, StateEntry};
use device_update::error::{self, Result};
use device_update::logging;
use log::info;
use simplelog::LevelFilter;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Hand-build and validate control-map JSON documents before pushing them to a device fleet.
#[derive(FromArgs, PartialEq, Debug)]
struct Arguments {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Command {
    Init(InitArgs),
    SetAction(SetActionArgs),
    SetPriority(SetPriorityArgs),
    Validate(ValidateArgs),
}

/// Create an empty control map with the given id.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "init")]
struct InitArgs {
    /// control map file to create
    #[argh(positional)]
    file: PathBuf,

    /// UUID identifying the control map
    #[argh(option)]
    id: String,
}

impl InitArgs {
    fn run(self) -> Result<()> {
        let map = ControlMap {
            id: self.id,
            priority: 0,
            states: BTreeMap::new(),
        };
        write(&self.file, &map)
    }
}

/// Set the action and expiry fallback at one control point.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "set-action")]
struct SetActionArgs {
    /// control map file to modify
    #[argh(positional)]
    file: PathBuf,

    /// control point to govern, e.g. "ArtifactInstall_Enter"
    #[argh(option)]
    point: String,

    /// action to take while the map is live: continue, force-continue, pause, or fail
    #[argh(option)]
    action: ActionArg,

    /// action to fall back to once the map expires: continue, force-continue, or fail. Defaults
    /// to "fail" if --action is pause, else to --action's own value.
    #[argh(option)]
    on_map_expire: Option<ExpireActionArg>,

    /// action to record once --action has been carried out; defaults to --action's own value
    #[argh(option)]
    on_action_executed: Option<ActionArg>,
}

impl SetActionArgs {
    fn run(self) -> Result<()> {
        let mut map = load(&self.file)?;
        let action = self.action.0;
        let on_map_expire = self.on_map_expire.map(|a| a.0).unwrap_or(match action {
            Action::Pause => ExpireAction::Fail,
            Action::Continue => ExpireAction::Continue,
            Action::ForceContinue => ExpireAction::ForceContinue,
            Action::Fail => ExpireAction::Fail,
        });
        let on_action_executed = self.on_action_executed.map(|a| a.0).unwrap_or(action);
        map.states.insert(
            self.point,
            StateEntry {
                action,
                on_map_expire,
                on_action_executed,
            },
        );
        write(&self.file, &map)
    }
}

/// Set the map's priority, used to break ties between overlapping maps at the same control point.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "set-priority")]
struct SetPriorityArgs {
    /// control map file to modify
    #[argh(positional)]
    file: PathBuf,

    /// priority, from -10 to 10; higher wins when maps disagree
    #[argh(option)]
    priority: i8,
}

impl SetPriorityArgs {
    fn run(self) -> Result<()> {
        let mut map = load(&self.file)?;
        map.priority = self.priority;
        write(&self.file, &map)
    }
}

/// Validate a control map file, but make no changes. Exits non-zero and prints the reason on
/// failure rather than silently writing a sanitized copy back.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "validate")]
struct ValidateArgs {
    #[argh(positional)]
    file: PathBuf,
}

impl ValidateArgs {
    fn run(self) -> Result<()> {
        let map = load(&self.file)?;
        let map = map
            .validate()
            .map_err(|source| error::Error::ControlMap { source })?;
        info!(
            "'{}' is valid: {} control point(s) configured at priority {}",
            map.id,
            map.states.len(),
            map.priority
        );
        Ok(())
    }
}

/// Thin wrapper so `Action` can be parsed from a `--action` flag value.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct ActionArg(Action);

impl std::str::FromStr for ActionArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continue" => Ok(ActionArg(Action::Continue)),
            "force-continue" => Ok(ActionArg(Action::ForceContinue)),
            "pause" => Ok(ActionArg(Action::Pause)),
            "fail" => Ok(ActionArg(Action::Fail)),
            other => Err(format!(
                "'{other}' is not one of continue, force-continue, pause, fail"
            )),
        }
    }
}

/// Thin wrapper so `ExpireAction` can be parsed from a `--on-map-expire` flag value.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct ExpireActionArg(ExpireAction);

impl std::str::FromStr for ExpireActionArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continue" => Ok(ExpireActionArg(ExpireAction::Continue)),
            "force-continue" => Ok(ExpireActionArg(ExpireAction::ForceContinue)),
            "fail" => Ok(ExpireActionArg(ExpireAction::Fail)),
            other => Err(format!(
                "'{other}' is not one of continue, force-continue, fail"
            )),
        }
    }
}

fn load(path: &std::path::Path) -> Result<ControlMap> {
    control_map::load_file(path).map_err(|source| error::Error::ControlMap { source })
}

fn write(path: &std::path::Path, map: &ControlMap) -> Result<()> {
    control_map::write_file(path, map).map_err(|source| error::Error::ControlMap { source })
}

fn main_inner() -> Result<()> {
    logging::init(LevelFilter::Info)?;
    let arguments: Arguments = argh::from_env();
    match arguments.command {
        Command::Init(args) => args.run(),
        Command::SetAction(args) => args.run(),
        Command::SetPriority(args) => args.run(),
        Command::Validate(args) => args.run(),
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        NamedTempFile::new().unwrap().path().to_path_buf()
    }

    #[test]
    fn init_then_set_action_round_trips() {
        let path = temp_path();
        InitArgs {
            file: path.clone(),
            id: "9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f".to_string(),
        }
        .run()
        .unwrap();

        SetActionArgs {
            file: path.clone(),
            point: "ArtifactInstall_Enter".to_string(),
            action: ActionArg(Action::Pause),
            on_map_expire: None,
            on_action_executed: None,
        }
        .run()
        .unwrap();

        let map = load(&path).unwrap();
        assert_eq!(map.states.len(), 1);
        let entry = map.states.get("ArtifactInstall_Enter").unwrap();
        assert_eq!(entry.action, Action::Pause);
        // --on-map-expire was omitted with --action pause, so it must default to fail rather
        // than silently continuing once the map expires.
        assert_eq!(entry.on_map_expire, ExpireAction::Fail);
    }

    #[test]
    fn set_priority_persists() {
        let path = temp_path();
        InitArgs {
            file: path.clone(),
            id: "9c858f83-4b71-4b1e-9d2b-5a6b7c8d9e0f".to_string(),
        }
        .run()
        .unwrap();
        SetPriorityArgs {
            file: path.clone(),
            priority: 7,
        }
        .run()
        .unwrap();
        assert_eq!(load(&path).unwrap().priority, 7);
    }

    #[test]
    fn validate_rejects_bad_uuid() {
        let path = temp_path();
        let map = ControlMap {
            id: "not-a-uuid".to_string(),
            priority: 0,
            states: BTreeMap::new(),
        };
        write(&path, &map).unwrap();
        assert!(ValidateArgs { file: path }.run().is_err());
    }
}
