//! Control maps: operator-authored overrides that pause, fail, or force past a control point in
//! the state machine for a bounded window, consulted before entering install/reboot/commit.

pub mod error;
mod pool;
mod types;

pub use pool::Pool;
pub use types::{
    is_valid_uuid, load_file, write_file, Action, ControlMap, ControlPoint, ExpireAction,
    StateEntry,
};
