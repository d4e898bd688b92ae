pub mod atr;
pub mod macd;
pub mod rsi;

pub use atr::average_true_range;
pub use macd::{Crossover, MacdIndicator, MacdReading};
pub use rsi::RsiIndicator;
