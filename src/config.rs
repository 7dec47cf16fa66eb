use serde::{Deserialize, Serialize};

use crate::{
    core::{dcql_match::MatchingOptions, device_engagement::EngagementParseOptions},
    presentment::PresentmentConfig,
};

/// Settings for a holder. Every member has a default, so an empty JSON object is a valid
/// configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub engagement: EngagementParseOptions,
    pub matching: MatchingOptions,
    pub presentment: PresentmentConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
