use async_trait::async_trait;

use common::{KlineInterval, Result, SeriesBundle};

use crate::indicators::{average_true_range, Crossover, MacdIndicator, RsiIndicator};
use crate::{StrategyExecutor, StrategyOutput};

/// Trades 4H MACD crossovers, entering at the latest 1H close with an
/// ATR-based stop and a fixed reward/risk target.
pub struct MacdCrossStrategy {
    name: String,
    indicator: MacdIndicator,
    atr_period: usize,
    atr_multiplier: f64,
    reward_risk: f64,
}

impl MacdCrossStrategy {
    pub fn new(
        name: impl Into<String>,
        indicator: MacdIndicator,
        atr_period: usize,
        atr_multiplier: f64,
        reward_risk: f64,
    ) -> Self {
        Self {
            name: name.into(),
            indicator,
            atr_period,
            atr_multiplier,
            reward_risk,
        }
    }
}

#[async_trait]
impl StrategyExecutor for MacdCrossStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, bundle: &SeriesBundle, _symbol: &str) -> Result<Option<StrategyOutput>> {
        let Some(trend) = bundle.get(KlineInterval::Hour4) else {
            return Ok(None);
        };
        let Some(reading) = self.indicator.compute(&trend.closes()) else {
            return Ok(None);
        };
        let side = match reading.crossover {
            Crossover::Bullish => "BUY",
            Crossover::Bearish => "SELL",
            Crossover::None => return Ok(None),
        };

        let entry_series = bundle.get(KlineInterval::Hour1).unwrap_or(trend);
        let Some(entry) = entry_series.last().map(|b| b.close) else {
            return Ok(None);
        };
        let atr = average_true_range(&entry_series.bars, self.atr_period).unwrap_or(0.0);
        let risk = atr * self.atr_multiplier;

        let mut output = StrategyOutput::new(side, entry);
        output.buy_price = Some(entry);
        if risk > 0.0 {
            let (stop, target) = if side == "BUY" {
                (entry - risk, entry + risk * self.reward_risk)
            } else {
                (entry + risk, entry - risk * self.reward_risk)
            };
            output.stop_loss = Some(stop).filter(|s| *s > 0.0);
            output.take_profit = Some(target).filter(|t| *t > 0.0);
            output.profit_loss_ratio = Some(self.reward_risk);
        }
        output.expiration = Some("4h".to_string());
        output.remark = Some(format!(
            "4H MACD {:.4} vs signal {:.4}, ATR {:.4}",
            reading.macd, reading.signal, atr
        ));
        Ok(Some(output))
    }
}

/// Trades an RSI leaving the oversold or overbought zone.
pub struct RsiReversalStrategy {
    name: String,
    indicator: RsiIndicator,
    interval: KlineInterval,
}

impl RsiReversalStrategy {
    pub fn new(name: impl Into<String>, indicator: RsiIndicator, interval: KlineInterval) -> Self {
        Self {
            name: name.into(),
            indicator,
            interval,
        }
    }
}

#[async_trait]
impl StrategyExecutor for RsiReversalStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, bundle: &SeriesBundle, _symbol: &str) -> Result<Option<StrategyOutput>> {
        let Some(series) = bundle.get(self.interval) else {
            return Ok(None);
        };
        let closes = series.closes();
        let Some((prev, curr)) = self.indicator.last_two(&closes) else {
            return Ok(None);
        };

        let side = if prev <= self.indicator.oversold && curr > self.indicator.oversold {
            "BUY"
        } else if prev >= self.indicator.overbought && curr < self.indicator.overbought {
            "SELL"
        } else {
            return Ok(None);
        };

        let Some(&price) = closes.last() else {
            return Ok(None);
        };
        let mut output = StrategyOutput::new(side, price);
        output.buy_price = Some(price);
        output.remark = Some(format!("{} RSI {prev:.1} -> {curr:.1}", self.interval));
        Ok(Some(output))
    }
}
