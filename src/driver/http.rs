//! 限速请求分发器 - 所有 HTTP 驱动共用

use super::{DriverError, DriverResult, REQUEST_TIMEOUT_SECS};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// 指数退避
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8), true)
    }
}

/// 传输层抽象
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl Transport for Client {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        Client::execute(self, request).await
    }
}

/// 429、5xx 以及超时类状态码可以重试
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
}

/// 限速请求分发器
///
/// 保证两次请求之间至少间隔 `min_interval`，同时在途请求不超过 `max_concurrent`，
/// 可重试的失败按退避策略重放。
pub struct RateLimitedDispatcher<T: Transport = Client> {
    transport: T,
    min_interval: Duration,
    permits: Semaphore,
    next_slot: Mutex<Instant>,
    backoff: Backoff,
    max_retries: u32,
}

impl RateLimitedDispatcher<Client> {
    pub fn new(min_interval: Duration, max_concurrent: usize) -> DriverResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_transport(client, min_interval, max_concurrent))
    }
}

impl<T: Transport> RateLimitedDispatcher<T> {
    pub fn with_transport(transport: T, min_interval: Duration, max_concurrent: usize) -> Self {
        Self {
            transport,
            min_interval,
            permits: Semaphore::new(max_concurrent.max(1)),
            next_slot: Mutex::new(Instant::now()),
            backoff: Backoff::default(),
            max_retries: 3,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff, max_retries: u32) -> Self {
        self.backoff = backoff;
        self.max_retries = max_retries;
        self
    }

    /// 等到下一个可用的发送时刻
    async fn wait_slot(&self) {
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// 发送请求，非 2xx 响应转为错误
    pub async fn send(&self, request: Request) -> DriverResult<Response> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DriverError::Cancelled)?;

        let mut attempt = 0u32;
        loop {
            let req = request
                .try_clone()
                .ok_or_else(|| DriverError::Remote("请求体不可重放".to_string()))?;
            let url = req.url().clone();
            self.wait_slot().await;

            match self.transport.execute(req).await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if is_retryable_status(status) && attempt < self.max_retries {
                        let delay = self.backoff.delay(attempt);
                        warn!("请求 {} 返回 {}，{:?} 后重试 ({})", url.path(), status, delay, attempt + 1);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    return Err(DriverError::Api { status, body });
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    warn!("请求 {} 失败: {}，{:?} 后重试 ({})", url.path(), e, delay, attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 发送请求并解析 JSON
    pub async fn send_json<R: DeserializeOwned>(&self, request: Request) -> DriverResult<R> {
        let resp = self.send(request).await?;
        let status = resp.status();
        let value = resp.json::<R>().await?;
        debug!("响应解析完成: {}", status);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(dispatcher: RateLimitedDispatcher) -> RateLimitedDispatcher {
        dispatcher.with_backoff(
            Backoff::new(Duration::from_millis(1), Duration::from_millis(2), false),
            2,
        )
    }

    #[test]
    fn test_backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), false);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(backoff.delay_with_rng(0, &mut rng), Duration::from_millis(100));
        assert_eq!(backoff.delay_with_rng(2, &mut rng), Duration::from_millis(400));
        assert_eq!(backoff.delay_with_rng(5, &mut rng), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        assert!(backoff.delay_with_rng(3, &mut rng) <= Duration::from_millis(800));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let dispatcher = fast(RateLimitedDispatcher::new(Duration::ZERO, 2).unwrap());
        let client = Client::new();
        let request = client.get(format!("{}/flaky", server.uri())).build().unwrap();
        let value: serde_json::Value = dispatcher.send_json(request).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = fast(RateLimitedDispatcher::new(Duration::ZERO, 2).unwrap());
        let request = Client::new()
            .get(format!("{}/missing", server.uri()))
            .build()
            .unwrap();
        match dispatcher.send(request).await {
            Err(DriverError::Api { status, body }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn test_requests_are_spaced_by_min_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dispatcher = RateLimitedDispatcher::new(Duration::from_millis(60), 4).unwrap();
        let client = Client::new();
        let started = std::time::Instant::now();
        for _ in 0..3 {
            let request = client.get(server.uri()).build().unwrap();
            dispatcher.send(request).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
