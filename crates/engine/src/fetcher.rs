use std::error::Error as _;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::{Config, FetchError, Proxy, RetryClass};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
];

const LOGGED_BODY_CHARS: usize = 200;

/// Cool-down windows, in milliseconds, before the attempt multiplier applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffRanges {
    pub rate_limited: (u64, u64),
    pub blocked: (u64, u64),
    pub transient: (u64, u64),
}

impl Default for BackoffRanges {
    fn default() -> Self {
        Self {
            rate_limited: (500, 1_500),
            blocked: (10_000, 30_000),
            transient: (1_000, 3_000),
        }
    }
}

impl BackoffRanges {
    fn range(&self, class: RetryClass) -> (u64, u64) {
        match class {
            RetryClass::RateLimited => self.rate_limited,
            RetryClass::Blocked => self.blocked,
            RetryClass::Transient => self.transient,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Fixed part of the delay slept before every attempt.
    pub base_delay: Duration,
    /// Upper bound of the random part added to `base_delay`.
    pub delay_jitter: Duration,
    pub backoff: BackoffRanges,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            delay_jitter: Duration::from_millis(1_500),
            backoff: BackoffRanges::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: cfg.fetch_max_attempts.max(1),
            base_delay: cfg.fetch_base_delay,
            delay_jitter: cfg.fetch_delay_jitter,
            timeout: cfg.fetch_timeout,
            ..Self::default()
        }
    }

    /// No pre-request delay and no cool-down between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
            backoff: BackoffRanges {
                rate_limited: (0, 0),
                blocked: (0, 0),
                transient: (0, 0),
            },
            timeout: Duration::from_secs(5),
        }
    }

    fn pre_request_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter_ms = self.delay_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 { 0 } else { rng.gen_range(0..=jitter_ms) };
        self.base_delay + Duration::from_millis(jitter)
    }
}

/// Linear growth: 1.0, 1.5, 2.0, ... for attempts 1, 2, 3, ...
pub fn backoff_multiplier(attempt: u32) -> f64 {
    1.0 + 0.5 * f64::from(attempt.saturating_sub(1))
}

/// Cool-down after a failed `attempt` (1-based) of the given class.
pub fn backoff_delay<R: Rng + ?Sized>(
    class: RetryClass,
    attempt: u32,
    ranges: &BackoffRanges,
    rng: &mut R,
) -> Duration {
    let (lo, hi) = ranges.range(class);
    let base = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
    Duration::from_millis((base as f64 * backoff_multiplier(attempt)).round() as u64)
}

/// HTTP GET with pre-request jitter, retry classification and randomized
/// identity headers. Bound to at most one egress proxy for its lifetime.
#[derive(Clone)]
pub struct ResilientFetcher {
    http: Client,
    policy: RetryPolicy,
    proxy: Option<Proxy>,
    cancel: CancellationToken,
}

impl ResilientFetcher {
    pub fn new(
        policy: RetryPolicy,
        proxy: Option<&Proxy>,
        cancel: CancellationToken,
    ) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(policy.timeout)
            .connect_timeout(policy.timeout)
            .default_headers(stable_headers());

        if let Some(p) = proxy {
            if !p.is_well_formed() {
                return Err(FetchError::InvalidProxy(p.to_string()));
            }
            let mut rp = reqwest::Proxy::all(p.url())
                .map_err(|e| FetchError::InvalidProxy(format!("{p}: {e}")))?;
            if let Some((user, pass)) = p.credentials() {
                rp = rp.basic_auth(user, pass);
            }
            builder = builder.proxy(rp);
        } else {
            builder = builder.no_proxy();
        }

        let http = builder
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            policy,
            proxy: proxy.cloned(),
            cancel,
        })
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url` and return the response body.
    ///
    /// Retryable failures are attempted up to `max_attempts` times in total;
    /// anything else fails on the first attempt. Cancellation during any
    /// sleep yields `FetchError::Interrupted`.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.policy.pre_request_delay(&mut rand::thread_rng());
            self.pause(delay).await?;

            let err = match self.send_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            let Some(class) = err.retry_class() else {
                warn!(url, attempt, proxy = ?self.proxy_label(), error = %err, "Request failed, not retrying");
                return Err(err);
            };

            if attempt >= max_attempts {
                warn!(url, attempt, proxy = ?self.proxy_label(), error = %err, "Retry ceiling reached");
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let cool_down =
                backoff_delay(class, attempt, &self.policy.backoff, &mut rand::thread_rng());
            warn!(
                url,
                attempt,
                proxy = ?self.proxy_label(),
                error = %err,
                backoff_ms = cool_down.as_millis() as u64,
                "Retryable failure, backing off"
            );
            self.pause(cool_down).await?;
        }
    }

    async fn send_once(&self, url: &str) -> Result<String, FetchError> {
        let headers = identity_headers(&mut rand::thread_rng());
        let resp = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await.map_err(|e| FetchError::Body(e.to_string()))?;
            debug!(url, status = status.as_u16(), body = %truncate(&body), "Response received");
            return Ok(body);
        }

        let code = status.as_u16();
        match code {
            429 => Err(FetchError::RateLimited(code)),
            403 | 409 => Err(FetchError::Blocked(code)),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(FetchError::Status {
                    status: code,
                    body: truncate(&body),
                })
            }
        }
    }

    async fn pause(&self, delay: Duration) -> Result<(), FetchError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Interrupted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn proxy_label(&self) -> Option<String> {
        self.proxy.as_ref().map(Proxy::address)
    }
}

fn stable_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

fn identity_headers<R: Rng + ?Sized>(rng: &mut R) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let agent = USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0]);
    headers.insert(USER_AGENT, HeaderValue::from_static(agent));
    if let Ok(ip) = HeaderValue::from_str(&random_forwarded_ip(rng)) {
        headers.insert("X-Forwarded-For", ip);
    }
    headers
}

/// A random unicast-looking IPv4 address.
pub fn random_forwarded_ip<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=223u8),
        rng.gen_range(0..=255u8),
        rng.gen_range(0..=255u8),
        rng.gen_range(1..=254u8)
    )
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    let detail = error_chain(&err);
    if detail.to_lowercase().contains("handshake") {
        return FetchError::Handshake(detail);
    }
    if err.is_connect() {
        return FetchError::Connect(detail);
    }
    if err.is_body() || err.is_decode() {
        return FetchError::Body(detail);
    }
    FetchError::Transport(detail)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= LOGGED_BODY_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(LOGGED_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn fetcher(max_attempts: u32) -> ResilientFetcher {
        ResilientFetcher::new(RetryPolicy::immediate(max_attempts), None, CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn multiplier_grows_linearly() {
        assert_eq!(backoff_multiplier(1), 1.0);
        assert_eq!(backoff_multiplier(2), 1.5);
        assert_eq!(backoff_multiplier(4), 2.5);
    }

    #[test]
    fn blocked_backoff_stays_in_scaled_window() {
        let ranges = BackoffRanges::default();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let d = backoff_delay(RetryClass::Blocked, 3, &ranges, &mut rng);
            assert!(d >= Duration::from_millis(20_000) && d <= Duration::from_millis(60_000));
        }
    }

    #[test]
    fn forwarded_ip_has_public_first_octet() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let ip = random_forwarded_ip(&mut rng);
            let first: u8 = ip.split('.').next().unwrap().parse().unwrap();
            assert!((1..=223).contains(&first), "{ip}");
        }
    }

    #[test]
    fn invalid_proxy_is_rejected() {
        let proxy = Proxy::new("127.0.0.1", 0, common::ProxyKind::Http);
        let result =
            ResilientFetcher::new(RetryPolicy::immediate(1), Some(&proxy), CancellationToken::new());
        assert!(matches!(result, Err(FetchError::InvalidProxy(_))));
    }

    #[tokio::test]
    async fn success_returns_body_and_sends_identity_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .match_header("accept", "application/json")
            .match_header("x-forwarded-for", Matcher::Regex(r"^\d+\.\d+\.\d+\.\d+$".into()))
            .match_header("user-agent", Matcher::Regex("Mozilla".into()))
            .with_status(200)
            .with_body("pong")
            .expect(1)
            .create_async()
            .await;

        let body = fetcher(4).fetch(&format!("{}/ping", server.url())).await.unwrap();
        assert_eq!(body, "pong");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn blocked_is_retried_up_to_the_ceiling() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/blocked")
            .with_status(403)
            .expect(4)
            .create_async()
            .await;

        let err = fetcher(4)
            .fetch(&format!("{}/blocked", server.url()))
            .await
            .unwrap_err();
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, FetchError::Blocked(403)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_on_final_attempt_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let err = fetcher(2)
            .fetch(&format!("{}/limited", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("no such symbol")
            .expect(1)
            .create_async()
            .await;

        let err = fetcher(4)
            .fetch(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refused_connection_is_transient_and_exhausts() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(3)
            .fetch(&format!("http://{addr}/klines"))
            .await
            .unwrap_err();
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.retry_class(), Some(RetryClass::Transient));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/slow").with_status(403).create_async().await;

        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            backoff: BackoffRanges {
                blocked: (60_000, 60_000),
                ..BackoffRanges::default()
            },
            ..RetryPolicy::immediate(4)
        };
        let fetcher = ResilientFetcher::new(policy, None, cancel.clone()).unwrap();
        let url = format!("{}/slow", server.url());
        let task = tokio::spawn(async move { fetcher.fetch(&url).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("fetch should stop promptly")
            .unwrap();
        assert!(matches!(result, Err(FetchError::Interrupted)));
    }

    #[test]
    fn long_bodies_are_truncated_for_logs() {
        let body = "x".repeat(500);
        assert_eq!(truncate(&body).len(), LOGGED_BODY_CHARS + 3);
        assert_eq!(truncate("short"), "short");
    }
}
