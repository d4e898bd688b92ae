use common::Bar;

/// Wilder's Average True Range over `period` bars. Needs `period + 1` bars.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();

    let n = period as f64;
    let mut atr = true_ranges[..period].iter().sum::<f64>() / n;
    for tr in &true_ranges[period..] {
        atr = (atr * (n - 1.0) + tr) / n;
    }
    Some(atr)
}
