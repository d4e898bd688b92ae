/// A watched coin and the quote currencies it may trade against.
#[derive(Debug, Clone, Copy)]
pub struct WatchedCoin {
    pub symbol: &'static str,
    pub quotes: &'static [&'static str],
}

const USDT_ONLY: &[&str] = &["USDT"];

/// Built-in watchlist used when no symbols are configured.
pub const TOP_COINS: &[WatchedCoin] = &[
    WatchedCoin { symbol: "BTC", quotes: &["USDT", "ETH"] },
    WatchedCoin { symbol: "ETH", quotes: &["USDT", "BTC"] },
    WatchedCoin { symbol: "BNB", quotes: USDT_ONLY },
    WatchedCoin { symbol: "SOL", quotes: USDT_ONLY },
    WatchedCoin { symbol: "FIL", quotes: USDT_ONLY },
    WatchedCoin { symbol: "MKR", quotes: USDT_ONLY },
    WatchedCoin { symbol: "UNI", quotes: USDT_ONLY },
    WatchedCoin { symbol: "AAVE", quotes: USDT_ONLY },
    WatchedCoin { symbol: "LINK", quotes: USDT_ONLY },
    WatchedCoin { symbol: "DOT", quotes: USDT_ONLY },
    WatchedCoin { symbol: "NEAR", quotes: USDT_ONLY },
    WatchedCoin { symbol: "APT", quotes: USDT_ONLY },
    WatchedCoin { symbol: "ZEC", quotes: USDT_ONLY },
    WatchedCoin { symbol: "XLM", quotes: USDT_ONLY },
    WatchedCoin { symbol: "TAO", quotes: USDT_ONLY },
    WatchedCoin { symbol: "SUI", quotes: USDT_ONLY },
];

/// Allowed quote currencies for `coin`. Coins outside the built-in list
/// trade against USDT only.
pub fn allowed_quotes(coin: &str) -> &'static [&'static str] {
    TOP_COINS
        .iter()
        .find(|c| c.symbol.eq_ignore_ascii_case(coin))
        .map(|c| c.quotes)
        .unwrap_or(USDT_ONLY)
}

pub fn watchlist_symbols() -> Vec<String> {
    TOP_COINS.iter().map(|c| c.symbol.to_string()).collect()
}
