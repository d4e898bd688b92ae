use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{Bar, Error, Result, SeriesBundle};

use crate::{StrategyExecutor, StrategyOutput};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delegates evaluation to an external strategy service over HTTP.
///
/// `POST {base_url}/api/strategy/execute` with the symbol, the remote
/// strategy name and the bars keyed by interval label.
pub struct RemoteStrategy {
    name: String,
    remote_name: String,
    endpoint: String,
    http: Client,
}

impl RemoteStrategy {
    pub fn new(
        name: impl Into<String>,
        remote_name: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Strategy(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            remote_name: remote_name.into(),
            endpoint: format!("{}/api/strategy/execute", base_url.trim_end_matches('/')),
            http,
        })
    }
}

#[async_trait]
impl StrategyExecutor for RemoteStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, bundle: &SeriesBundle, symbol: &str) -> Result<Option<StrategyOutput>> {
        let request = ExecuteRequest {
            symbol,
            strategy_name: &self.remote_name,
            kline_data: bundle
                .iter()
                .map(|(interval, series)| (interval.label(), series.bars.as_slice()))
                .collect(),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Strategy(format!("{}: request failed: {e}", self.name)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Strategy(format!("{}: HTTP {status}: {body}", self.name)));
        }

        let reply: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| Error::Strategy(format!("{}: bad response: {e}", self.name)))?;

        if !reply.success {
            warn!(
                strategy = %self.name,
                %symbol,
                message = reply.message.as_deref().unwrap_or(""),
                "Remote strategy reported failure"
            );
            return Ok(None);
        }
        debug!(strategy = %self.name, %symbol, "Remote strategy answered");
        Ok(reply.data)
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    symbol: &'a str,
    strategy_name: &'a str,
    kline_data: BTreeMap<&'static str, &'a [Bar]>,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<StrategyOutput>,
}
