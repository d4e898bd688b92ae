use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::coins;
use crate::Error;

/// Exchanges the ingestion pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeType {
    Binance,
    Okx,
    GateIo,
    Bybit,
}

impl ExchangeType {
    pub const ALL: [ExchangeType; 4] = [
        ExchangeType::Binance,
        ExchangeType::Okx,
        ExchangeType::GateIo,
        ExchangeType::Bybit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Binance => "BINANCE",
            ExchangeType::Okx => "OKX",
            ExchangeType::GateIo => "GATE_IO",
            ExchangeType::Bybit => "BYBIT",
        }
    }
}

impl std::fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "BINANCE" => Ok(ExchangeType::Binance),
            "OKX" => Ok(ExchangeType::Okx),
            "GATE_IO" | "GATEIO" | "GATE" => Ok(ExchangeType::GateIo),
            "BYBIT" => Ok(ExchangeType::Bybit),
            other => Err(Error::Parse(format!("unknown exchange '{other}'"))),
        }
    }
}

/// Candle width. Ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "_1M")]
    Min1,
    #[serde(rename = "_5M")]
    Min5,
    #[serde(rename = "_15M")]
    Min15,
    #[serde(rename = "_1H")]
    Hour1,
    #[serde(rename = "_4H")]
    Hour4,
    #[serde(rename = "_1D")]
    Day1,
    #[serde(rename = "_1W")]
    Week1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 7] = [
        KlineInterval::Min1,
        KlineInterval::Min5,
        KlineInterval::Min15,
        KlineInterval::Hour1,
        KlineInterval::Hour4,
        KlineInterval::Day1,
        KlineInterval::Week1,
    ];

    /// Intervals fed to strategies: everything except the two shortest.
    pub fn signal_intervals() -> &'static [KlineInterval] {
        &Self::ALL[2..]
    }

    pub fn label(&self) -> &'static str {
        match self {
            KlineInterval::Min1 => "_1M",
            KlineInterval::Min5 => "_5M",
            KlineInterval::Min15 => "_15M",
            KlineInterval::Hour1 => "_1H",
            KlineInterval::Hour4 => "_4H",
            KlineInterval::Day1 => "_1D",
            KlineInterval::Week1 => "_1W",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            KlineInterval::Min1 => Duration::minutes(1),
            KlineInterval::Min5 => Duration::minutes(5),
            KlineInterval::Min15 => Duration::minutes(15),
            KlineInterval::Hour1 => Duration::hours(1),
            KlineInterval::Hour4 => Duration::hours(4),
            KlineInterval::Day1 => Duration::days(1),
            KlineInterval::Week1 => Duration::weeks(1),
        }
    }

    /// The token each exchange expects in its kline query string.
    pub fn native(&self, exchange: ExchangeType) -> &'static str {
        use KlineInterval::*;
        match exchange {
            ExchangeType::Binance | ExchangeType::GateIo => match self {
                Min1 => "1m",
                Min5 => "5m",
                Min15 => "15m",
                Hour1 => "1h",
                Hour4 => "4h",
                Day1 => "1d",
                Week1 => "1w",
            },
            ExchangeType::Okx => match self {
                Min1 => "1m",
                Min5 => "5m",
                Min15 => "15m",
                Hour1 => "1H",
                Hour4 => "4H",
                Day1 => "1D",
                Week1 => "1W",
            },
            ExchangeType::Bybit => match self {
                Min1 => "1",
                Min5 => "5",
                Min15 => "15",
                Hour1 => "60",
                Hour4 => "240",
                Day1 => "D",
                Week1 => "W",
            },
        }
    }
}

impl std::fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Build a bar whose close time is derived from the interval width.
    pub fn new(
        open_time: DateTime<Utc>,
        interval: KlineInterval,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open_time,
            close_time: open_time + interval.duration() - Duration::milliseconds(1),
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Bars for a single interval, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub interval: KlineInterval,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(interval: KlineInterval, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.open_time);
        Self { interval, bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Every series fetched for one (exchange, symbol) unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesBundle(BTreeMap<KlineInterval, BarSeries>);

impl SeriesBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: BarSeries) {
        self.0.insert(series.interval, series);
    }

    pub fn get(&self, interval: KlineInterval) -> Option<&BarSeries> {
        self.0.get(&interval)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KlineInterval, &BarSeries)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PairStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairStatus::Active => write!(f, "ACTIVE"),
            PairStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

impl FromStr for PairStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(PairStatus::Active),
            "INACTIVE" => Ok(PairStatus::Inactive),
            other => Err(Error::Parse(format!("unknown pair status '{other}'"))),
        }
    }
}

/// A spot instrument listed on an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub exchange: ExchangeType,
    pub status: PairStatus,
    pub instrument_type: String,
    pub listing_date: Option<DateTime<Utc>>,
}

/// Direction of a persisted trade signal. Anything else a strategy
/// reports (HOLD, NONE, ...) never becomes a `TradeSignal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for SignalKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(SignalKind::Buy),
            "SELL" => Ok(SignalKind::Sell),
            other => Err(Error::Parse(format!("not a tradable signal '{other}'"))),
        }
    }
}

/// A buy/sell recommendation emitted by a strategy. Append-only once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: String,
    pub symbol: String,
    pub exchange: ExchangeType,
    pub strategy: String,
    pub signal: SignalKind,
    pub price: f64,
    pub buy_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub profit_loss_ratio: Option<f64>,
    pub signal_time: DateTime<Utc>,
    pub expiration: Option<String>,
    pub remark: Option<String>,
}

/// Which trading pairs the synchronizer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CryptoMode {
    /// Only the watched coins, against their allowed quote currencies.
    #[default]
    Custom,
    /// Every pair the exchange lists.
    All,
}

impl std::fmt::Display for CryptoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoMode::Custom => write!(f, "custom"),
            CryptoMode::All => write!(f, "all"),
        }
    }
}

impl FromStr for CryptoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "custom" => Ok(CryptoMode::Custom),
            "all" => Ok(CryptoMode::All),
            other => Err(Error::Parse(format!("unknown crypto mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum ProxyKind {
    Socks5,
    Http,
    Https,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyKind::Socks5 => write!(f, "SOCKS5"),
            ProxyKind::Http => write!(f, "HTTP"),
            ProxyKind::Https => write!(f, "HTTPS"),
        }
    }
}

impl FromStr for ProxyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SOCKS" | "SOCKS5" => Ok(ProxyKind::Socks5),
            "HTTP" => Ok(ProxyKind::Http),
            "HTTPS" => Ok(ProxyKind::Https),
            other => Err(Error::Parse(format!("unknown proxy type '{other}'"))),
        }
    }
}

/// An egress proxy. Owned by `Settings`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    pub port: u16,
    pub kind: ProxyKind,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Proxy {
    pub fn new(ip: impl Into<String>, port: u16, kind: ProxyKind) -> Self {
        Self {
            ip: ip.into(),
            port,
            kind,
            username: None,
            password: None,
        }
    }

    /// `host:port`, used in logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip.trim(), self.port)
    }

    /// Proxy URL without credentials, in the form reqwest expects.
    pub fn url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Socks5 => "socks5h",
            ProxyKind::Http | ProxyKind::Https => "http",
        };
        format!("{scheme}://{}", self.address())
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), pass) if !user.is_empty() => Some((user, pass.unwrap_or(""))),
            _ => None,
        }
    }

    /// Cheap syntactic check; DNS resolution happens when a pool opens.
    pub fn is_well_formed(&self) -> bool {
        self.port != 0 && !self.ip.trim().is_empty()
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.kind, self.address())
    }
}

/// Deployment-wide runtime settings, stored as a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub crypto_mode: CryptoMode,
    /// Minutes between the end of one pipeline run and the start of the next.
    pub fetch_frequency: u32,
    pub exchanges: Vec<ExchangeType>,
    /// Watched coins, only consulted in `custom` mode.
    pub crypto_symbols: Vec<String>,
    pub proxies: Vec<Proxy>,
}

impl Settings {
    pub const DEFAULT_FREQUENCY_MINUTES: u32 = 15;
    pub const DEFAULT_EXCHANGE: ExchangeType = ExchangeType::GateIo;

    /// Fill in anything a stored or user-supplied record left blank.
    pub fn normalize(&mut self) {
        if self.fetch_frequency == 0 {
            self.fetch_frequency = Self::DEFAULT_FREQUENCY_MINUTES;
        }
        if self.exchanges.is_empty() {
            self.exchanges.push(Self::DEFAULT_EXCHANGE);
        }
        let mut seen = Vec::with_capacity(self.exchanges.len());
        self.exchanges.retain(|e| {
            if seen.contains(e) {
                false
            } else {
                seen.push(*e);
                true
            }
        });
        self.crypto_symbols = self
            .crypto_symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if self.crypto_mode == CryptoMode::Custom && self.crypto_symbols.is_empty() {
            self.crypto_symbols = coins::watchlist_symbols();
        }
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.fetch_frequency.max(1)))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crypto_mode: CryptoMode::Custom,
            fetch_frequency: Self::DEFAULT_FREQUENCY_MINUTES,
            exchanges: vec![Self::DEFAULT_EXCHANGE],
            crypto_symbols: coins::watchlist_symbols(),
            proxies: Vec::new(),
        }
    }
}

/// Where the pipeline scheduler currently sits in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    ComputingNextRun,
    Waiting,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::ComputingNextRun => write!(f, "computing-next-run"),
            SchedulerState::Waiting => write!(f, "waiting"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Commands sent to the scheduler via its command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Skip the remaining wait and start a cycle immediately.
    RunNow,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_tokens_follow_each_exchange() {
        assert_eq!(KlineInterval::Hour1.native(ExchangeType::Binance), "1h");
        assert_eq!(KlineInterval::Hour1.native(ExchangeType::Okx), "1H");
        assert_eq!(KlineInterval::Hour1.native(ExchangeType::Bybit), "60");
        assert_eq!(KlineInterval::Day1.native(ExchangeType::Bybit), "D");
        assert_eq!(KlineInterval::Week1.native(ExchangeType::GateIo), "1w");
    }

    #[test]
    fn signal_intervals_skip_the_two_shortest() {
        let intervals = KlineInterval::signal_intervals();
        assert_eq!(intervals.first(), Some(&KlineInterval::Min15));
        assert!(!intervals.contains(&KlineInterval::Min1));
        assert!(!intervals.contains(&KlineInterval::Min5));
        assert_eq!(intervals.len(), 5);
    }

    #[test]
    fn exchange_names_round_trip_through_display() {
        for exchange in ExchangeType::ALL {
            assert_eq!(exchange.to_string().parse::<ExchangeType>().unwrap(), exchange);
        }
        assert!("KRAKEN".parse::<ExchangeType>().is_err());
    }

    #[test]
    fn series_is_sorted_oldest_first() {
        let t0 = Utc::now();
        let later = Bar::new(t0 + Duration::hours(1), KlineInterval::Hour1, 1.0, 1.0, 1.0, 2.0, 1.0);
        let earlier = Bar::new(t0, KlineInterval::Hour1, 1.0, 1.0, 1.0, 1.0, 1.0);
        let series = BarSeries::new(KlineInterval::Hour1, vec![later, earlier]);
        assert_eq!(series.closes(), vec![1.0, 2.0]);
        assert_eq!(
            series.bars[0].close_time,
            t0 + Duration::hours(1) - Duration::milliseconds(1)
        );
    }

    #[test]
    fn normalize_fills_defaults() {
        let mut settings = Settings {
            crypto_mode: CryptoMode::Custom,
            fetch_frequency: 0,
            exchanges: vec![],
            crypto_symbols: vec![" ".into()],
            proxies: vec![],
        };
        settings.normalize();
        assert_eq!(settings.fetch_frequency, 15);
        assert_eq!(settings.exchanges, vec![ExchangeType::GateIo]);
        assert!(settings.crypto_symbols.contains(&"BTC".to_string()));
    }

    #[test]
    fn normalize_keeps_empty_symbols_in_all_mode() {
        let mut settings = Settings {
            crypto_mode: CryptoMode::All,
            fetch_frequency: 30,
            exchanges: vec![ExchangeType::Okx, ExchangeType::Okx],
            crypto_symbols: vec![],
            proxies: vec![],
        };
        settings.normalize();
        assert_eq!(settings.fetch_frequency, 30);
        assert_eq!(settings.exchanges, vec![ExchangeType::Okx]);
        assert!(settings.crypto_symbols.is_empty());
    }

    #[test]
    fn proxy_url_depends_on_kind() {
        let socks = Proxy::new("10.0.0.1", 1080, ProxyKind::Socks5);
        assert_eq!(socks.url(), "socks5h://10.0.0.1:1080");
        let http = Proxy::new("10.0.0.2", 8080, ProxyKind::Https);
        assert_eq!(http.url(), "http://10.0.0.2:8080");
        assert!(!Proxy::new("10.0.0.3", 0, ProxyKind::Http).is_well_formed());
        assert_eq!("socks".parse::<ProxyKind>().unwrap(), ProxyKind::Socks5);
    }

    #[test]
    fn proxies_key_by_address_and_kind() {
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(Proxy::new("10.0.0.1", 1080, ProxyKind::Socks5)));
        assert!(seen.insert(Proxy::new("10.0.0.1", 1080, ProxyKind::Http)));
        assert!(!seen.insert(Proxy::new("10.0.0.1", 1080, ProxyKind::Socks5)));
        assert_eq!(seen.len(), 2);
    }
}
