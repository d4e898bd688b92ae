use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "macd_cross"
/// name = "SimpleMacdCross"
///
/// [strategy.params]
/// fast = 12
/// slow = 26
/// signal = 9
///
/// [[strategy]]
/// type = "remote"
/// name = "PyRsi"
///
/// [strategy.params]
/// url = "http://127.0.0.1:5000"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier: "macd_cross", "rsi_reversal" or "remote".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Name recorded on every signal the strategy emits.
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Type-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn enabled_by_default() -> bool {
    true
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read strategy config at '{path}': {e}")))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}
