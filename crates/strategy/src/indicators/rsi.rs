/// RSI (Relative Strength Index) with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl RsiIndicator {
    /// `None` when the period is below 2 or the zones overlap.
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Option<Self> {
        if period < 2 || oversold >= overbought {
            return None;
        }
        Some(Self {
            period,
            overbought,
            oversold,
        })
    }

    /// RSI of the latest close. Needs at least `period + 1` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let (seed, rest) = changes.split_at(self.period);
        let n = self.period as f64;

        let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
        let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;

        for &change in rest {
            avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
            avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
        }

        if avg_loss == 0.0 {
            return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// RSI on the previous and the latest close.
    pub fn last_two(&self, closes: &[f64]) -> Option<(f64, f64)> {
        let prev = self.compute(&closes[..closes.len().checked_sub(1)?])?;
        let curr = self.compute(closes)?;
        Some((prev, curr))
    }
}
