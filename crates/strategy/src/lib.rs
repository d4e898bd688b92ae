pub mod builtin;
pub mod config;
pub mod indicators;
pub mod registry;
pub mod remote;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use registry::StrategyRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use common::{Result, SeriesBundle};

/// All strategy implementations must satisfy this trait.
///
/// An executor sees one symbol's series bundle per call and answers with at
/// most one recommendation. Errors are reported to the caller, which treats
/// them as "no signal".
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Name stored alongside every signal this executor produces.
    fn name(&self) -> &str;

    async fn execute(&self, bundle: &SeriesBundle, symbol: &str) -> Result<Option<StrategyOutput>>;
}

/// Raw strategy answer, before the registry validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutput {
    /// `BUY` or `SELL` to be kept; anything else is dropped.
    pub signal: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub profit_loss_ratio: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub expiration: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl StrategyOutput {
    pub fn new(signal: impl Into<String>, price: f64) -> Self {
        Self {
            signal: signal.into(),
            price: Some(price),
            ..Self::default()
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
