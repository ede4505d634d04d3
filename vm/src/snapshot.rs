use questmark::{Instruction, LabelMap};
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::value::{Context, Value};
use crate::vm::PendingChoice;

/// Serializable VM state: everything needed to continue a run elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub stack: Vec<Value>,
    pub context: Context,
    pub program_list: Vec<Instruction>,
    pub label_map: LabelMap,
    pub program_counter: usize,
    pub exit: bool,
    pub pause: bool,
    /// Offered choices while paused, queued ones otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_choices: Vec<PendingChoice>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(json)?)
    }
}
