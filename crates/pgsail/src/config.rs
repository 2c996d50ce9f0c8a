//! Adapter configuration.

use serde::{Deserialize, Serialize};

use crate::connection::PoolConfig;
use crate::executor::ExecutorConfig;
use crate::schema::TypeMappingMode;
use crate::Result;

/// Top-level configuration for a datastore.
///
/// Every field has a default, so partial documents are accepted:
///
/// ```ignore
/// let config = AdapterConfig::from_json(r#"{"type_mapping": "best_effort"}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
    pub type_mapping: TypeMappingMode,
}

impl AdapterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
