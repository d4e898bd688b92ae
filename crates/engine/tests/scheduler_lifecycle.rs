mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::{
    CryptoMode, ExchangeType, SchedulerState, Settings, SettingsStore, SignalQuery, SignalStore,
    TradingPairStore,
};
use engine::{
    PairSynchronizer, PipelineOptions, Scheduler, SchedulerHandle, SettingsService, SignalPipeline,
};
use store::SqliteStore;
use strategy::StrategyRegistry;
use support::{pair, AlwaysBuy, FakeFactory, Script};

const PATIENCE: Duration = Duration::from_secs(5);

struct Rig {
    db: Arc<SqliteStore>,
    factory: Arc<FakeFactory>,
    shutdown: CancellationToken,
    scheduler: Scheduler,
    handle: SchedulerHandle,
}

/// A scheduler over one OKX pair with a 15 minute frequency.
async fn rig(script: Script) -> Rig {
    let db = Arc::new(SqliteStore::in_memory().await.unwrap());
    db.save(&Settings {
        crypto_mode: CryptoMode::Custom,
        fetch_frequency: 15,
        exchanges: vec![ExchangeType::Okx],
        ..Settings::default()
    })
    .await
    .unwrap();
    db.replace_all(&[pair(ExchangeType::Okx, "BTC-USDT")]).await.unwrap();

    let factory = Arc::new(FakeFactory::new([(ExchangeType::Okx, script)]));
    let synchronizer = Arc::new(PairSynchronizer::new(
        factory.clone(),
        db.clone(),
        CancellationToken::new(),
    ));
    let settings = Arc::new(SettingsService::new(db.clone(), synchronizer.clone()));
    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(AlwaysBuy)).unwrap();

    let shutdown = CancellationToken::new();
    let pipeline = SignalPipeline::new(
        factory.clone(),
        db.clone(),
        db.clone(),
        synchronizer,
        Arc::new(registry),
        PipelineOptions {
            kline_limit: 50,
            pool_shutdown: Duration::from_secs(10),
        },
    )
    .with_shutdown(shutdown.child_token());

    let (scheduler, handle) = Scheduler::new(settings, pipeline);
    Rig {
        db,
        factory,
        shutdown,
        scheduler,
        handle,
    }
}

async fn wait_for_state(handle: &SchedulerHandle, wanted: SchedulerState) {
    tokio::time::timeout(PATIENCE, async {
        while handle.state().await != wanted {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("scheduler never reached {wanted:?}"));
}

async fn wait_for_completion(handle: &SchedulerHandle) {
    tokio::time::timeout(PATIENCE, async {
        while handle.last_completion().await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no run completed");
}

async fn stop(handle: &SchedulerHandle, task: JoinHandle<()>) {
    handle.stop().await;
    tokio::time::timeout(PATIENCE, task)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(handle.state().await, SchedulerState::Stopped);
}

async fn stored(db: &SqliteStore) -> u64 {
    db.query(&SignalQuery::default()).await.unwrap().total
}

#[tokio::test]
async fn run_now_skips_the_wait() {
    let Rig {
        db,
        factory,
        scheduler,
        handle,
        ..
    } = rig(Script::healthy(&["BTC-USDT"])).await;
    assert_eq!(handle.state().await, SchedulerState::Idle);

    let task = tokio::spawn(scheduler.run());
    wait_for_state(&handle, SchedulerState::Waiting).await;
    assert!(handle.last_completion().await.is_none());
    assert!(factory.calls_for(ExchangeType::Okx, "BTC-USDT").is_empty());

    handle.run_now().await;
    wait_for_completion(&handle).await;
    assert_eq!(stored(&db).await, 1);

    // Back to waiting a full period for the next cycle.
    wait_for_state(&handle, SchedulerState::Waiting).await;
    assert_eq!(stored(&db).await, 1);

    stop(&handle, task).await;
}

#[tokio::test]
async fn state_follows_the_cycle() {
    let script = Script {
        klines_stall: true,
        ..Script::healthy(&["BTC-USDT"])
    };
    let Rig {
        shutdown,
        scheduler,
        handle,
        ..
    } = rig(script).await;

    let task = tokio::spawn(scheduler.run_immediately(true).run());
    wait_for_state(&handle, SchedulerState::Running).await;
    assert!(handle.last_completion().await.is_none());

    // Releases the stalled fetches; the run completes and the next wait starts.
    shutdown.cancel();
    wait_for_completion(&handle).await;
    wait_for_state(&handle, SchedulerState::Waiting).await;

    stop(&handle, task).await;
}

#[tokio::test]
async fn queued_stop_wins_over_an_overdue_run() {
    let Rig {
        db,
        factory,
        scheduler,
        handle,
        ..
    } = rig(Script::healthy(&["BTC-USDT"])).await;

    handle.stop().await;
    let task = tokio::spawn(scheduler.run_immediately(true).run());
    tokio::time::timeout(PATIENCE, task)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(handle.state().await, SchedulerState::Stopped);
    assert!(handle.last_completion().await.is_none());
    assert!(factory.calls_for(ExchangeType::Okx, "BTC-USDT").is_empty());
    assert_eq!(stored(&db).await, 0);
}

#[tokio::test]
async fn immediate_start_runs_without_a_command() {
    let Rig {
        db,
        scheduler,
        handle,
        ..
    } = rig(Script::healthy(&["BTC-USDT"])).await;

    let task = tokio::spawn(scheduler.run_immediately(true).run());
    wait_for_completion(&handle).await;
    assert_eq!(stored(&db).await, 1);

    stop(&handle, task).await;
}
