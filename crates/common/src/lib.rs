pub mod coins;
pub mod config;
pub mod error;
pub mod exchange;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, FetchError, Result, RetryClass};
pub use exchange::ExchangeClient;
pub use store::{SettingsStore, SignalPage, SignalQuery, SignalStore, TradingPairStore};
pub use types::*;
