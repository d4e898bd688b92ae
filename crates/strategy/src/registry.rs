use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use common::{Error, ExchangeType, KlineInterval, Result, SeriesBundle, SignalKind, TradeSignal};

use crate::builtin::{MacdCrossStrategy, RsiReversalStrategy};
use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::indicators::{MacdIndicator, RsiIndicator};
use crate::remote::{RemoteStrategy, DEFAULT_TIMEOUT};
use crate::{StrategyExecutor, StrategyOutput};

/// Strategy name → executor, built once at startup.
#[derive(Default)]
pub struct StrategyRegistry {
    executors: BTreeMap<String, Arc<dyn StrategyExecutor>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from config. Disabled entries are skipped; unknown
    /// types, bad parameters and duplicate names are errors.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut registry = Self::new();
        for cfg in file_cfg.strategies.iter().filter(|c| c.enabled) {
            let executor = build_strategy(cfg)?;
            info!(name = %executor.name(), kind = %cfg.strategy_type, "Registered strategy");
            registry.register(executor)?;
        }
        if registry.is_empty() {
            warn!("No strategies enabled; pipeline runs will not produce signals");
        }
        Ok(registry)
    }

    pub fn register(&mut self, executor: Arc<dyn StrategyExecutor>) -> Result<()> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(Error::Config(format!("duplicate strategy name '{name}'")));
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Run every strategy on one symbol's bundle and return the signals worth
    /// storing, tagged with `exchange`. A failing strategy counts as "no
    /// signal" and never affects the others.
    pub async fn evaluate(
        &self,
        exchange: ExchangeType,
        symbol: &str,
        bundle: &SeriesBundle,
    ) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        for (name, executor) in &self.executors {
            match executor.execute(bundle, symbol).await {
                Ok(Some(output)) => match accept(output, exchange, symbol, name) {
                    Some(signal) => {
                        info!(
                            strategy = %name,
                            %exchange,
                            %symbol,
                            signal = %signal.signal,
                            price = signal.price,
                            "Signal generated"
                        );
                        signals.push(signal);
                    }
                    None => debug!(strategy = %name, %exchange, %symbol, "Strategy output discarded"),
                },
                Ok(None) => {}
                Err(e) => warn!(
                    strategy = %name,
                    %exchange,
                    %symbol,
                    error = %e,
                    "Strategy failed, treating as no signal"
                ),
            }
        }
        signals
    }
}

/// Turn a strategy answer into a storable signal. Only an exact `BUY` or
/// `SELL` with a positive, finite price survives.
pub fn accept(
    output: StrategyOutput,
    exchange: ExchangeType,
    symbol: &str,
    strategy: &str,
) -> Option<TradeSignal> {
    let kind = match output.signal.as_str() {
        "BUY" => SignalKind::Buy,
        "SELL" => SignalKind::Sell,
        _ => return None,
    };
    let price = output.price.filter(|p| p.is_finite() && *p > 0.0)?;

    Some(TradeSignal {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: symbol.to_string(),
        exchange,
        strategy: strategy.to_string(),
        signal: kind,
        price,
        buy_price: output.buy_price,
        take_profit: output.take_profit,
        stop_loss: output.stop_loss,
        profit_loss_ratio: output.profit_loss_ratio,
        signal_time: Utc::now(),
        expiration: output.expiration,
        remark: output.remark,
    })
}

// ─── Strategy builders ────────────────────────────────────────────────────────

fn build_strategy(cfg: &StrategyConfig) -> Result<Arc<dyn StrategyExecutor>> {
    let invalid = |what: &str| Error::Config(format!("strategy '{}': {what}", cfg.name));

    match cfg.strategy_type.as_str() {
        "macd_cross" => {
            let fast = param_usize(&cfg.params, "fast", 12);
            let slow = param_usize(&cfg.params, "slow", 26);
            let signal = param_usize(&cfg.params, "signal", 9);
            let indicator = MacdIndicator::new(fast, slow, signal)
                .ok_or_else(|| invalid("MACD periods must satisfy 0 < fast < slow, signal > 0"))?;
            Ok(Arc::new(MacdCrossStrategy::new(
                cfg.name.clone(),
                indicator,
                param_usize(&cfg.params, "atr_period", 14),
                param_f64(&cfg.params, "atr_multiplier", 1.5),
                param_f64(&cfg.params, "reward_risk", 2.0),
            )))
        }
        "rsi_reversal" => {
            let period = param_usize(&cfg.params, "period", 14);
            let overbought = param_f64(&cfg.params, "overbought", 70.0);
            let oversold = param_f64(&cfg.params, "oversold", 30.0);
            let indicator = RsiIndicator::new(period, overbought, oversold)
                .ok_or_else(|| invalid("RSI needs period >= 2 and oversold < overbought"))?;
            let interval = match param_str(&cfg.params, "interval") {
                Some(label) => parse_interval(label).ok_or_else(|| invalid("unknown interval"))?,
                None => KlineInterval::Day1,
            };
            Ok(Arc::new(RsiReversalStrategy::new(cfg.name.clone(), indicator, interval)))
        }
        "remote" => {
            let url = param_str(&cfg.params, "url").ok_or_else(|| invalid("missing 'url'"))?;
            let remote_name = param_str(&cfg.params, "strategy").unwrap_or(cfg.name.as_str());
            let timeout = param_usize(&cfg.params, "timeout_secs", DEFAULT_TIMEOUT.as_secs() as usize);
            Ok(Arc::new(RemoteStrategy::new(
                cfg.name.clone(),
                remote_name,
                url,
                Duration::from_secs(timeout as u64),
            )?))
        }
        other => Err(Error::Config(format!("unknown strategy type '{other}'"))),
    }
}

fn parse_interval(label: &str) -> Option<KlineInterval> {
    KlineInterval::ALL
        .into_iter()
        .find(|i| i.label().eq_ignore_ascii_case(label) || i.label()[1..].eq_ignore_ascii_case(label))
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

fn param_str<'a>(params: &'a HashMap<String, toml::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
