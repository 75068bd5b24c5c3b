/// Current persisted state name.
pub const STATE: &str = "state";
/// State name pending a schema bump; consulted instead of `state` when a bump is in progress.
pub const STATE_UNCOMMITTED: &str = "state-uncommitted";
pub const ARTIFACT_NAME: &str = "artifact-name";
pub const ARTIFACT_GROUP: &str = "artifact-group";
pub const ARTIFACT_PROVIDES: &str = "artifact-provides";
/// Serialized `StateData` for a standalone (non-managed) install, consulted across process
/// restarts of the standalone CLI path.
pub const STANDALONE_STATE_DATA: &str = "standalone-state-data";
