use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const EMPTY_PAYLOAD_TYPE: &str = "";

#[derive(Debug, Serialize, Deserialize)]
pub struct PayloadDeclaration {
    #[serde(rename = "type")]
    pub payload_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactProvides {
    pub artifact_name: String,
    pub artifact_group: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ArtifactDepends {
    #[serde(default)]
    pub device_type: Vec<String>,
    #[serde(default)]
    pub artifact_group: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub payloads: Vec<PayloadDeclaration>,
    pub artifact_provides: ArtifactProvides,
    #[serde(default)]
    pub artifact_depends: ArtifactDepends,
    #[serde(default)]
    pub clears_artifact_provides: Vec<String>,
}

impl HeaderInfo {
    pub fn is_empty_payload(&self) -> bool {
        matches!(self.payloads.first(), Some(p) if p.payload_type == EMPTY_PAYLOAD_TYPE)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default)]
    pub artifact_provides: BTreeMap<String, String>,
    #[serde(default)]
    pub artifact_depends: BTreeMap<String, String>,
    #[serde(default)]
    pub clears_artifact_provides: Vec<String>,
}

/// One payload's parsed `type-info` (and, if present, raw `meta-data` bytes).
#[derive(Debug)]
pub struct PayloadInfo {
    pub index: u32,
    pub type_info: TypeInfo,
    pub meta_data: Option<Vec<u8>>,
}
