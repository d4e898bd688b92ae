use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use common::{SchedulerCommand, SchedulerState, Settings};

use crate::pipeline::SignalPipeline;
use crate::settings::SettingsService;

/// Pause before retrying when settings cannot be read.
const SETTINGS_RETRY: Duration = Duration::from_secs(60);

/// When the next cycle is due: `frequency` after the last completion, or
/// after `now` if nothing has completed yet. May lie in the past.
pub fn next_run_at(
    last_completion: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    frequency: chrono::Duration,
) -> DateTime<Utc> {
    last_completion.unwrap_or(now) + frequency
}

/// Cloneable handle for observing and steering the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
    last_completion: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl SchedulerHandle {
    pub async fn send(&self, cmd: SchedulerCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn last_completion(&self) -> Option<DateTime<Utc>> {
        *self.last_completion.read().await
    }

    /// Skip the rest of the current wait and run a cycle now.
    pub async fn run_now(&self) {
        self.send(SchedulerCommand::RunNow).await;
    }

    pub async fn stop(&self) {
        self.send(SchedulerCommand::Stop).await;
    }
}

/// Drives the signal pipeline on an adaptive timer.
pub struct Scheduler {
    settings: Arc<SettingsService>,
    pipeline: SignalPipeline,
    state: Arc<RwLock<SchedulerState>>,
    last_completion: Arc<RwLock<Option<DateTime<Utc>>>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<SchedulerCommand>,
    run_immediately: bool,
}

impl Scheduler {
    pub fn new(settings: Arc<SettingsService>, pipeline: SignalPipeline) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(SchedulerState::Idle));
        let last_completion = Arc::new(RwLock::new(None));

        let handle = SchedulerHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
            last_completion: last_completion.clone(),
        };

        let scheduler = Scheduler {
            settings,
            pipeline,
            state,
            last_completion,
            command_rx,
            command_tx,
            run_immediately: false,
        };

        (scheduler, handle)
    }

    /// Start the first cycle without waiting a full period.
    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }

    async fn set_state(&self, state: SchedulerState) {
        *self.state.write().await = state;
    }

    /// Wait for `delay` or a command. Returns false when the scheduler
    /// should stop. Queued commands win over an already elapsed timer.
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            cmd = self.command_rx.recv() => match cmd {
                Some(SchedulerCommand::RunNow) => {
                    info!("Run requested, skipping remaining wait");
                    true
                }
                Some(SchedulerCommand::Stop) => {
                    info!("Stop requested");
                    false
                }
                None => {
                    warn!("Scheduler command channel closed, shutting down");
                    false
                }
            },
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run the scheduler loop until stopped. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Scheduler started");

        loop {
            self.set_state(SchedulerState::ComputingNextRun).await;
            let settings = match self.settings.get().await {
                Ok(settings) => settings,
                Err(e) => {
                    error!(error = %e, "Failed to load settings, retrying shortly");
                    self.set_state(SchedulerState::Waiting).await;
                    if !self.wait(SETTINGS_RETRY).await {
                        break;
                    }
                    continue;
                }
            };

            let now = Utc::now();
            let next = if std::mem::take(&mut self.run_immediately) {
                now
            } else {
                let last = *self.last_completion.read().await;
                next_run_at(last, now, settings.fetch_interval())
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, frequency_minutes = settings.fetch_frequency, "Next pipeline run scheduled");

            self.set_state(SchedulerState::Waiting).await;
            if !self.wait(delay).await {
                break;
            }

            self.set_state(SchedulerState::Running).await;
            let settings = self.current_settings(settings).await;
            let report = self.pipeline.run_once(&settings).await;
            *self.last_completion.write().await = Some(Utc::now());
            info!(signals = report.signals_saved(), failed = report.failed.len(), "Pipeline cycle complete");

            self.set_state(SchedulerState::Idle).await;
        }

        self.set_state(SchedulerState::Stopped).await;
        info!("Scheduler stopped");
    }

    /// Settings may have changed during the wait; prefer a fresh copy.
    async fn current_settings(&self, fallback: Settings) -> Settings {
        match self.settings.get().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Settings reload failed, using values read before the wait");
                fallback
            }
        }
    }
}
