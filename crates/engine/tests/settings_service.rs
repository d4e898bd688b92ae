mod support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{CryptoMode, ExchangeType, Settings, SettingsStore, TradingPairStore};
use engine::{PairSynchronizer, SettingsService};
use store::SqliteStore;
use support::{FakeFactory, Script};

fn service(db: &Arc<SqliteStore>, factory: FakeFactory) -> SettingsService {
    let synchronizer = Arc::new(PairSynchronizer::new(
        Arc::new(factory),
        db.clone(),
        CancellationToken::new(),
    ));
    SettingsService::new(db.clone(), synchronizer)
}

#[tokio::test]
async fn first_read_persists_defaults() {
    let db = Arc::new(SqliteStore::in_memory().await.unwrap());
    let settings = service(&db, FakeFactory::default()).get().await.unwrap();

    assert_eq!(settings, Settings::default());
    assert_eq!(settings.exchanges, vec![ExchangeType::GateIo]);
    assert_eq!(db.load().await.unwrap(), Some(Settings::default()));
}

#[tokio::test]
async fn save_normalizes_and_resyncs() {
    let db = Arc::new(SqliteStore::in_memory().await.unwrap());
    let svc = service(
        &db,
        FakeFactory::new([(ExchangeType::Okx, Script::healthy(&["BTC-USDT", "XRP-USDT"]))]),
    );

    let resync = svc
        .save(Settings {
            crypto_mode: CryptoMode::Custom,
            fetch_frequency: 0,
            exchanges: vec![ExchangeType::Okx, ExchangeType::Okx],
            crypto_symbols: vec![" btc ".into()],
            proxies: Vec::new(),
        })
        .await
        .unwrap();
    resync.await.unwrap();

    let stored = svc.get().await.unwrap();
    assert_eq!(stored.fetch_frequency, Settings::DEFAULT_FREQUENCY_MINUTES);
    assert_eq!(stored.exchanges, vec![ExchangeType::Okx]);
    assert_eq!(stored.crypto_symbols, vec!["BTC".to_string()]);

    let pairs = db.find_by_exchange(ExchangeType::Okx).await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].symbol, "BTC-USDT");
}
