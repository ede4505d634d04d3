use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as Json};

/// Typed view of the options section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Context entries set before the first state runs.
    #[serde(rename = "initial-context")]
    pub initial_context: BTreeMap<String, Seed>,
    /// State to jump to once the context is seeded. Without it execution
    /// starts at the first state.
    #[serde(rename = "initial-state")]
    pub initial_state: Option<String>,
    pub options: BehaviourOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BehaviourOptions {
    pub no_link_behaviour: NoLinkBehaviour,
    pub whitespace: Whitespace,
}

/// What an option without a link does once its effects have run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoLinkBehaviour {
    /// Stop the story.
    Exit,
    /// Offer the current state's options again, without replaying its body.
    #[default]
    LoopbackToOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Whitespace {
    /// Emit text as the markdown parser normalized it.
    #[default]
    Normalize,
    /// Emit text exactly as written in the source.
    Retain,
    /// Anything else: treated as `Normalize`.
    Unknown(String),
}

impl From<String> for Whitespace {
    fn from(value: String) -> Self {
        match value.as_str() {
            "retain" => Whitespace::Retain,
            "normalize" => Whitespace::Normalize,
            _ => Whitespace::Unknown(value),
        }
    }
}

/// An `initial-context` value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Number(f64),
    Text(String),
}

impl Config {
    pub fn from_options(options: &Map<String, Json>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Json::Object(options.clone()))
    }

    pub fn retains_whitespace(&self) -> bool {
        self.options.whitespace == Whitespace::Retain
    }
}
