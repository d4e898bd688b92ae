/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal line = EMA(macd, signal_period).
/// A crossover is reported when the MACD line crosses the signal line on the
/// latest bar.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    Bullish, // MACD crossed above signal line
    Bearish, // MACD crossed below signal line
    None,
}

/// MACD values on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub crossover: Crossover,
}

impl MacdIndicator {
    /// `None` unless `0 < fast < slow` and `signal > 0`.
    pub fn new(fast: usize, slow: usize, signal: usize) -> Option<Self> {
        if fast == 0 || signal == 0 || fast >= slow {
            return None;
        }
        Some(Self { fast, slow, signal })
    }

    /// Closes needed before `compute` returns a reading.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal
    }

    /// Compute from close prices, oldest first.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdReading> {
        if closes.len() < self.min_len() {
            return None;
        }

        let fast_ema = ema_series(closes, self.fast);
        let slow_ema = ema_series(closes, self.slow);
        let offset = self.slow - self.fast;
        let macd_line: Vec<f64> = slow_ema
            .iter()
            .enumerate()
            .map(|(i, slow)| fast_ema[i + offset] - slow)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal);
        let (&curr_sig, &prev_sig) = (signal_line.last()?, signal_line.iter().rev().nth(1)?);
        let (&curr_macd, &prev_macd) = (macd_line.last()?, macd_line.iter().rev().nth(1)?);

        let crossover = if prev_macd <= prev_sig && curr_macd > curr_sig {
            Crossover::Bullish
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            Crossover::Bearish
        } else {
            Crossover::None
        };

        Some(MacdReading {
            macd: curr_macd,
            signal: curr_sig,
            histogram: curr_macd - curr_sig,
            crossover,
        })
    }
}

/// EMA over `data`, seeded with the SMA of the first `period` values.
/// Element `i` of the result lines up with `data[i + period - 1]`.
pub(crate) fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = data[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(data.len() - period + 1);
    out.push(seed);
    for &value in &data[period..] {
        let prev = out[out.len() - 1];
        out.push(value * k + prev * (1.0 - k));
    }
    out
}
