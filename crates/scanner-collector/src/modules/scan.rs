//! 시세 일괄 스캔 모듈.
//!
//! 티커 목록을 고정 개수의 동시 워커로 분배하고, 완료 순서대로
//! 결과를 수집/저장합니다 (제출 순서 보장 없음).
//!
//! # 처리 흐름
//!
//! 1. 대상 티커 결정 (CLI 목록 또는 `stock` 테이블의 활성 종목)
//! 2. 프록시 풀 구성 (JSON 파일, 없으면 직접 연결만)
//! 3. 워커별 fetch-with-retry: 시도마다 다른 프록시를 대여하고,
//!    rate limit은 딜레이 없이 즉시 다른 프록시로 재시도
//! 4. 성공한 스냅샷은 완료 즉시 `stock_price`에 upsert
//! 5. 티커마다 정확히 하나의 결과로 분류해 통계 집계
//!
//! Ctrl-C 수신 시 새 티커 제출만 중단합니다. 진행 중인 요청은
//! 완료될 때까지 기다립니다.

use crate::modules::checkpoint::{self, CheckpointStatus};
use crate::{CollectorError, Result, ScanStats, ScannerConfig};
use futures::stream::{self, StreamExt};
use rand::Rng;
use scanner_core::{Quote, QuoteTier};
use scanner_data::{
    load_proxy_file, DataError, ProxyPool, QuoteFetcher, StockPriceRepository, StockRepository,
    YahooQuoteClient, YahooQuoteConfig,
};
use sqlx::PgPool;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 스캔 체크포인트 워크플로우 이름.
const SCAN_WORKFLOW: &str = "scan";

/// 티커 하나의 처리 결과.
///
/// 모든 티커는 이 네 가지 중 정확히 하나로 분류됩니다.
#[derive(Debug)]
pub enum TickerOutcome {
    /// 수집 및 저장 성공
    Success { ticker: String, tier: QuoteTier },
    /// 검증 실패 (가격 누락 / 0 이하)
    Invalid { ticker: String, reason: String },
    /// 수집 실패 (재시도 소진 또는 저장 실패)
    Failed { ticker: String, error: String },
    /// 종료 요청으로 건너뜀
    Skipped { ticker: String },
}

impl TickerOutcome {
    /// 결과가 가리키는 티커.
    pub fn ticker(&self) -> &str {
        match self {
            Self::Success { ticker, .. }
            | Self::Invalid { ticker, .. }
            | Self::Failed { ticker, .. }
            | Self::Skipped { ticker } => ticker,
        }
    }
}

/// 스캔 워커 동작 옵션.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 동시 워커 수
    pub workers: usize,
    /// 티커당 최대 시도 횟수
    pub retry_attempts: u32,
    /// 재시도 딜레이 기준값 (밀리초)
    pub request_delay_ms: u64,
    /// 진행 로그 출력 간격 (완료 건수, 0이면 비활성)
    pub progress_interval: usize,
}

impl From<&crate::config::ScanSettings> for ScanOptions {
    fn from(settings: &crate::config::ScanSettings) -> Self {
        Self {
            workers: settings.workers,
            retry_attempts: settings.retry_attempts,
            request_delay_ms: settings.request_delay_ms,
            progress_interval: settings.progress_interval,
        }
    }
}

/// 시세 일괄 스캔 실행.
///
/// # Arguments
/// * `symbols` - 특정 티커만 스캔 (쉼표로 구분, 예: "AAPL,MSFT")
/// * `resume` - true면 이전 중단점 이후 티커부터 재개
pub async fn scan(
    pool: &PgPool,
    config: &ScannerConfig,
    symbols: Option<String>,
    resume: bool,
) -> Result<ScanStats> {
    let start = Instant::now();

    info!("시세 스캔 시작");

    // 수집할 티커 목록 결정
    let stock_repo = StockRepository::new(pool.clone());
    let mut tickers = match symbols {
        Some(ref s) => {
            // 쉼표로 구분된 티커 파싱
            let mut syms: Vec<String> = s
                .split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect();
            syms.sort();
            info!(count = syms.len(), "특정 티커 스캔");
            syms
        }
        None => {
            let syms = stock_repo
                .list_active_tickers(config.scan.ticker_limit)
                .await
                .map_err(CollectorError::from)?;
            info!(count = syms.len(), "활성 종목 조회 완료");
            syms
        }
    };

    // 중단점 재개: 마지막 처리 티커 이후만 남김
    if resume {
        if let Some(last) = checkpoint::load_checkpoint(pool, SCAN_WORKFLOW).await? {
            let before = tickers.len();
            tickers.retain(|t| t.as_str() > last.as_str());
            info!(
                last_ticker = %last,
                skipped = before - tickers.len(),
                "중단점부터 재개"
            );
        }
    }

    if tickers.is_empty() {
        warn!("스캔할 티커가 없습니다");
        let mut stats = ScanStats::new();
        stats.elapsed = start.elapsed();
        return Ok(stats);
    }

    // 프록시 풀 구성 (파일이 없으면 빈 풀 → 직접 연결만)
    let proxies = Arc::new(build_proxy_pool(config)?);
    if proxies.is_empty() {
        warn!("프록시 없이 직접 연결로 스캔합니다");
    } else {
        info!(count = proxies.len(), "프록시 풀 구성 완료");
    }

    // 시세 클라이언트
    let fetcher: Arc<dyn QuoteFetcher> = Arc::new(
        YahooQuoteClient::new(YahooQuoteConfig {
            request_timeout_secs: config.scan.request_timeout_secs,
            ..Default::default()
        })
        .map_err(CollectorError::from)?,
    );

    // 종료 신호: 새 티커 제출만 중단, 진행 중 요청은 완료까지 대기
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_task = tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("종료 신호 수신, 신규 제출 중단");
                shutdown.store(true, Ordering::Relaxed);
            }
        }
    });

    checkpoint::save_checkpoint(pool, SCAN_WORKFLOW, "", 0, CheckpointStatus::Running).await?;

    // 성공한 스냅샷은 완료 즉시 upsert
    let price_repo = StockPriceRepository::new(pool.clone());
    let sink = |quote: Quote| {
        let repo = price_repo.clone();
        async move { repo.upsert_quote(&quote).await }
    };

    let options = ScanOptions::from(&config.scan);
    let outcomes = run_fetch_pass(
        Arc::clone(&fetcher),
        Arc::clone(&proxies),
        tickers,
        &options,
        Arc::clone(&shutdown),
        sink,
    )
    .await;

    signal_task.abort();

    // 티커당 정확히 하나의 분류로 집계
    let mut stats = ScanStats::new();
    stats.total = outcomes.len();
    for outcome in &outcomes {
        match outcome {
            TickerOutcome::Success { .. } => stats.success += 1,
            TickerOutcome::Invalid { .. } => stats.invalid += 1,
            TickerOutcome::Failed { .. } => stats.failed += 1,
            TickerOutcome::Skipped { .. } => stats.skipped += 1,
        }
    }
    stats.elapsed = start.elapsed();

    // 체크포인트 마무리
    let processed = (stats.total - stats.skipped) as i32;
    if shutdown.load(Ordering::Relaxed) {
        // 완료 순서가 제출 순서와 다르므로 마지막 티커는 근사값
        let last_completed = outcomes
            .iter()
            .filter(|o| !matches!(o, TickerOutcome::Skipped { .. }))
            .map(|o| o.ticker())
            .max()
            .unwrap_or("");
        checkpoint::save_checkpoint(
            pool,
            SCAN_WORKFLOW,
            last_completed,
            processed,
            CheckpointStatus::Interrupted,
        )
        .await?;
    } else {
        checkpoint::save_checkpoint(
            pool,
            SCAN_WORKFLOW,
            "",
            processed,
            CheckpointStatus::Completed,
        )
        .await?;
    }

    let snapshot = proxies.snapshot();
    debug!(
        available = snapshot.available,
        rate_limited = snapshot.rate_limited,
        circuit_open = snapshot.circuit_open,
        disabled = snapshot.disabled,
        "스캔 종료 시점 프록시 풀 상태"
    );

    Ok(stats)
}

/// 티커 목록을 동시 워커로 분배하고 결과를 완료 순서대로 수집합니다.
///
/// 성공한 스냅샷은 `sink`로 전달되어 완료 즉시 저장됩니다. sink
/// 실패는 해당 티커의 실패로 집계하고 배치는 계속 진행합니다.
pub async fn run_fetch_pass<S, Fut>(
    fetcher: Arc<dyn QuoteFetcher>,
    proxies: Arc<ProxyPool>,
    tickers: Vec<String>,
    options: &ScanOptions,
    shutdown: Arc<AtomicBool>,
    sink: S,
) -> Vec<TickerOutcome>
where
    S: Fn(Quote) -> Fut,
    Fut: Future<Output = scanner_data::Result<()>>,
{
    let total = tickers.len();
    let started = Instant::now();
    let completed = AtomicUsize::new(0);

    let fetcher = fetcher.as_ref();
    let proxies = proxies.as_ref();
    let shutdown = shutdown.as_ref();
    let sink = &sink;
    let completed = &completed;
    let options = &*options;

    stream::iter(tickers)
        .map(|ticker| async move {
            let outcome = if shutdown.load(Ordering::Relaxed) {
                TickerOutcome::Skipped { ticker }
            } else {
                match fetch_with_retry(fetcher, proxies, &ticker, options).await {
                    Ok(quote) => {
                        let tier = quote.tier;
                        match sink(quote).await {
                            Ok(()) => TickerOutcome::Success { ticker, tier },
                            Err(e) => {
                                error!(ticker = %ticker, error = %e, "스냅샷 저장 실패");
                                TickerOutcome::Failed {
                                    ticker,
                                    error: format!("저장 실패: {}", e),
                                }
                            }
                        }
                    }
                    Err(FetchFailure::Invalid(reason)) => {
                        debug!(ticker = %ticker, reason = %reason, "검증 실패");
                        TickerOutcome::Invalid { ticker, reason }
                    }
                    Err(FetchFailure::Failed(err)) => {
                        debug!(ticker = %ticker, error = %err, "수집 실패");
                        TickerOutcome::Failed { ticker, error: err }
                    }
                }
            };

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if options.progress_interval > 0 && done % options.progress_interval == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                let throughput = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
                let snapshot = proxies.snapshot();
                info!(
                    processed = done,
                    total,
                    throughput = format!("{:.1}/s", throughput),
                    proxies_available = snapshot.available,
                    proxies_cooling = snapshot.rate_limited + snapshot.circuit_open,
                    "스캔 진행"
                );
            }

            outcome
        })
        .buffer_unordered(options.workers.max(1))
        .collect()
        .await
}

/// fetch 실패 분류 (워커 내부용).
enum FetchFailure {
    /// 검증 실패 (가격 누락 / 0 이하)
    Invalid(String),
    /// 재시도 소진
    Failed(String),
}

/// 단일 티커 수집 (재시도 포함).
///
/// 시도마다 풀에서 다른 프록시를 대여하고, 결과를 풀에 보고합니다.
/// 프록시를 얻지 못하면 직접 연결로 시도합니다 (풀 보고 없음).
async fn fetch_with_retry(
    fetcher: &dyn QuoteFetcher,
    proxies: &ProxyPool,
    ticker: &str,
    options: &ScanOptions,
) -> std::result::Result<Quote, FetchFailure> {
    let attempts = options.retry_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        let proxy = proxies.get_next();

        match fetcher.fetch_quote(ticker, proxy.as_deref()).await {
            Ok(quote) if quote.is_valid() => {
                if let Some(ref url) = proxy {
                    proxies.record_success(url);
                }
                return Ok(quote);
            }
            Ok(quote) => {
                // HTTP는 성공했지만 가격이 유효하지 않음 → 수집 실패로 취급
                if let Some(ref url) = proxy {
                    proxies.record_failure(url);
                }
                return Err(FetchFailure::Invalid(format!(
                    "{}: 가격이 없거나 0 이하",
                    quote.ticker
                )));
            }
            Err(e) if e.is_rate_limit() => {
                if let Some(ref url) = proxy {
                    proxies.record_rate_limit(url);
                }
                last_error = e.to_string();
                // rate limit은 딜레이 없이 다른 프록시로 즉시 재시도
            }
            Err(DataError::InvalidData(reason)) => {
                if let Some(ref url) = proxy {
                    proxies.record_failure(url);
                }
                return Err(FetchFailure::Invalid(reason));
            }
            Err(e) => {
                if let Some(ref url) = proxy {
                    proxies.record_failure(url);
                }
                last_error = e.to_string();
                if !e.is_retryable() {
                    break;
                }
                if attempt + 1 < attempts {
                    tokio::time::sleep(retry_delay(options.request_delay_ms, attempt, attempts))
                        .await;
                }
            }
        }
    }

    Err(FetchFailure::Failed(last_error))
}

/// 재시도 딜레이: 남은 시도 수에 비례해 줄어들며 무작위 지터를 더함.
fn retry_delay(base_ms: u64, attempt: u32, attempts: u32) -> Duration {
    let remaining = attempts.saturating_sub(attempt + 1) as u64;
    let jitter = if base_ms > 0 {
        rand::thread_rng().gen_range(0..50)
    } else {
        0
    };
    Duration::from_millis(base_ms * remaining.max(1) + jitter)
}

/// 설정에 따라 프록시 풀을 구성합니다.
fn build_proxy_pool(config: &ScannerConfig) -> Result<ProxyPool> {
    let pool_config = config.proxy.pool_config();
    let endpoints = match &config.proxy.file {
        Some(path) => load_proxy_file(path).map_err(CollectorError::from)?,
        None => Vec::new(),
    };
    Ok(ProxyPool::new(endpoints, pool_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use scanner_data::ProxyPoolConfig;
    use scanner_data::ProxyEndpoint;
    use std::collections::HashSet;

    /// 티커별로 동작을 지정할 수 있는 테스트용 fetcher.
    struct StubFetcher {
        /// 이 목록의 티커는 항상 실패
        fail: HashSet<String>,
        /// 이 목록의 티커는 가격 0 반환 (검증 실패)
        zero_price: HashSet<String>,
        /// 호출마다 첫 요청만 rate limit으로 응답
        rate_limit_first: bool,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn ok() -> Self {
            Self {
                fail: HashSet::new(),
                zero_price: HashSet::new(),
                rate_limit_first: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(tickers: &[&str]) -> Self {
            Self {
                fail: tickers.iter().map(|t| t.to_string()).collect(),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl QuoteFetcher for StubFetcher {
        async fn fetch_quote(
            &self,
            ticker: &str,
            _proxy: Option<&str>,
        ) -> scanner_data::Result<Quote> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);

            if self.rate_limit_first && call == 0 {
                return Err(DataError::RateLimited("HTTP 429".to_string()));
            }
            if self.fail.contains(ticker) {
                return Err(DataError::FetchError("connection reset".to_string()));
            }
            if self.zero_price.contains(ticker) {
                return Ok(Quote::new(ticker, dec!(0), QuoteTier::Fast));
            }
            Ok(Quote::new(ticker, dec!(100.5), QuoteTier::Fast))
        }
    }

    fn options() -> ScanOptions {
        ScanOptions {
            workers: 8,
            retry_attempts: 3,
            request_delay_ms: 0,
            progress_interval: 0,
        }
    }

    fn pool_of(n: usize) -> Arc<ProxyPool> {
        let endpoints = (0..n)
            .map(|i| ProxyEndpoint::new(format!("http://p{}:8080", i)))
            .collect();
        Arc::new(ProxyPool::new(endpoints, ProxyPoolConfig::default()))
    }

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{:03}", i)).collect()
    }

    async fn ok_sink(_quote: Quote) -> scanner_data::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_every_ticker_classified_exactly_once() {
        // 100개 티커 / 10개 프록시: 모든 티커가 정확히 한 번 분류되어야 함
        let failing: Vec<String> = (0..100)
            .filter(|i| i % 10 == 3)
            .map(|i| format!("T{:03}", i))
            .collect();
        let failing_refs: Vec<&str> = failing.iter().map(String::as_str).collect();
        let fetcher = Arc::new(StubFetcher::failing(&failing_refs));

        let outcomes = run_fetch_pass(
            fetcher as Arc<dyn QuoteFetcher>,
            pool_of(10),
            tickers(100),
            &options(),
            Arc::new(AtomicBool::new(false)),
            ok_sink,
        )
        .await;

        assert_eq!(outcomes.len(), 100);

        let mut seen = HashSet::new();
        let mut success = 0;
        let mut failed = 0;
        for outcome in &outcomes {
            assert!(seen.insert(outcome.ticker().to_string()), "중복 분류");
            match outcome {
                TickerOutcome::Success { .. } => success += 1,
                TickerOutcome::Failed { .. } => failed += 1,
                other => panic!("예상 밖 분류: {:?}", other),
            }
        }
        assert_eq!(success, 90);
        assert_eq!(failed, 10);
    }

    #[tokio::test]
    async fn test_rate_limited_proxy_enters_cooldown() {
        let fetcher = Arc::new(StubFetcher {
            rate_limit_first: true,
            ..StubFetcher::ok()
        });
        let proxies = pool_of(2);

        let outcomes = run_fetch_pass(
            fetcher as Arc<dyn QuoteFetcher>,
            Arc::clone(&proxies),
            vec!["AAPL".to_string()],
            &options(),
            Arc::new(AtomicBool::new(false)),
            ok_sink,
        )
        .await;

        // rate limit 후 다른 프록시로 재시도하여 성공
        assert!(matches!(outcomes[0], TickerOutcome::Success { .. }));
        assert_eq!(proxies.snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn test_shutdown_skips_remaining_tickers() {
        let fetcher = Arc::new(StubFetcher::ok());

        let outcomes = run_fetch_pass(
            fetcher as Arc<dyn QuoteFetcher>,
            pool_of(2),
            tickers(20),
            &options(),
            Arc::new(AtomicBool::new(true)),
            ok_sink,
        )
        .await;

        assert_eq!(outcomes.len(), 20);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, TickerOutcome::Skipped { .. })));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_records_proxy_failures() {
        let fetcher = Arc::new(StubFetcher::failing(&["AAPL"]));
        let proxies = pool_of(1);

        let outcomes = run_fetch_pass(
            Arc::clone(&fetcher) as Arc<dyn QuoteFetcher>,
            Arc::clone(&proxies),
            vec!["AAPL".to_string()],
            &options(),
            Arc::new(AtomicBool::new(false)),
            ok_sink,
        )
        .await;

        assert!(matches!(outcomes[0], TickerOutcome::Failed { .. }));
        // 시도 횟수만큼 호출
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 3);
        // 3회 연속 실패로는 circuit이 열리지 않음 (기준 5회)
        assert_eq!(proxies.snapshot().available, 1);
    }

    #[tokio::test]
    async fn test_invalid_price_classified_as_invalid() {
        let fetcher = Arc::new(StubFetcher {
            zero_price: ["AAPL".to_string()].into_iter().collect(),
            ..StubFetcher::ok()
        });

        let outcomes = run_fetch_pass(
            fetcher as Arc<dyn QuoteFetcher>,
            pool_of(1),
            vec!["AAPL".to_string()],
            &options(),
            Arc::new(AtomicBool::new(false)),
            ok_sink,
        )
        .await;

        assert!(matches!(outcomes[0], TickerOutcome::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_sink_error_counts_as_failure() {
        let fetcher = Arc::new(StubFetcher::ok());

        async fn failing_sink(_quote: Quote) -> scanner_data::Result<()> {
            Err(DataError::QueryError("connection closed".to_string()))
        }

        let outcomes = run_fetch_pass(
            fetcher as Arc<dyn QuoteFetcher>,
            pool_of(1),
            vec!["AAPL".to_string()],
            &options(),
            Arc::new(AtomicBool::new(false)),
            failing_sink,
        )
        .await;

        match &outcomes[0] {
            TickerOutcome::Failed { error, .. } => assert!(error.contains("저장 실패")),
            other => panic!("예상 밖 분류: {:?}", other),
        }
    }
}
