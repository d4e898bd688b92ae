use proptest::prelude::*;

use common::{ExchangeType, SignalKind};
use strategy::indicators::{MacdIndicator, RsiIndicator};
use strategy::registry::accept;
use strategy::StrategyOutput;

proptest! {
    /// RSI stays inside [0, 100] for any positive price path.
    #[test]
    fn rsi_is_bounded(closes in prop::collection::vec(0.0001f64..1_000_000.0, 2..200)) {
        let rsi = RsiIndicator::new(14, 70.0, 30.0).unwrap();
        if let Some(value) = rsi.compute(&closes) {
            prop_assert!((0.0..=100.0).contains(&value));
        }
    }

    /// MACD never panics on short or extreme input.
    #[test]
    fn macd_handles_any_series(closes in prop::collection::vec(0.0001f64..1_000_000.0, 0..120)) {
        let macd = MacdIndicator::new(12, 26, 9).unwrap();
        let reading = macd.compute(&closes);
        if closes.len() < macd.min_len() {
            prop_assert!(reading.is_none());
        }
    }

    /// Whatever a strategy answers, a stored signal is BUY/SELL with a positive price.
    #[test]
    fn accepted_signals_are_tradable(
        signal in prop::sample::select(vec!["BUY", "SELL", "sell", "HOLD", "", "NONE", "Buy"]),
        price in prop::num::f64::ANY,
    ) {
        let stored = accept(StrategyOutput::new(signal, price), ExchangeType::Okx, "BTC-USDT", "p");
        if let Some(stored) = &stored {
            prop_assert!(stored.price > 0.0 && stored.price.is_finite());
            prop_assert!(matches!(stored.signal, SignalKind::Buy | SignalKind::Sell));
        }
        if signal != "BUY" && signal != "SELL" {
            prop_assert!(stored.is_none());
        }
    }
}
