//! Yahoo Finance 시세 클라이언트.
//!
//! 업스트림 시세 API에서 단일 종목의 스냅샷을 수집합니다.
//!
//! ## 엔드포인트 계층
//! - **fast**: `/v8/finance/chart/{ticker}` — 작은 요약 페이로드
//! - **full**: `/v10/finance/quoteSummary/{ticker}` — 상세 페이로드,
//!   fast에서 유효한 가격을 얻지 못했을 때 폴백
//!
//! ## 실패 분류
//! - HTTP 429/999 또는 rate limit 응답 본문 → `RateLimited`
//! - 클라이언트 타임아웃 → `Timeout`
//! - 가격 누락 / 0 이하 → `InvalidData` (HTTP 성공이어도 수집 실패)
//!
//! 요청은 선택적으로 HTTP 포워드 프록시를 경유하며, 프록시별로
//! `reqwest::Client`를 만들어 캐시합니다.

use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use scanner_core::{Quote, QuoteTier};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// 요청마다 무작위로 선택하는 브라우저 User-Agent 목록.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// 시세 조회 추상화.
///
/// 스캔 디스패처는 구체 클라이언트 대신 이 trait에 의존합니다.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// 단일 종목의 시세 스냅샷을 가져옵니다.
    ///
    /// `proxy`가 `Some`이면 해당 포워드 프록시를 경유하고,
    /// `None`이면 직접 연결합니다.
    async fn fetch_quote(&self, ticker: &str, proxy: Option<&str>) -> Result<Quote>;
}

/// Yahoo Finance 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct YahooQuoteConfig {
    /// API Base URL
    pub base_url: String,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// fast 실패 시 full 엔드포인트 폴백 여부
    pub full_fallback: bool,
}

impl Default for YahooQuoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            request_timeout_secs: 8,
            full_fallback: true,
        }
    }
}

/// Yahoo Finance 시세 클라이언트.
pub struct YahooQuoteClient {
    config: YahooQuoteConfig,
    direct: reqwest::Client,
    /// 프록시 URL → 해당 프록시를 경유하는 클라이언트
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl YahooQuoteClient {
    /// 새 클라이언트를 생성합니다.
    pub fn new(config: YahooQuoteConfig) -> Result<Self> {
        let direct = build_client(None, config.request_timeout_secs)?;
        Ok(Self {
            config,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// 기본 설정으로 생성합니다.
    pub fn with_defaults() -> Result<Self> {
        Self::new(YahooQuoteConfig::default())
    }

    /// 프록시 경유 여부에 따라 HTTP 클라이언트를 반환합니다.
    ///
    /// 프록시별 클라이언트는 최초 사용 시 생성 후 캐시됩니다.
    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let Some(proxy_url) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cache = self.proxied.lock().expect("proxy client cache lock poisoned");
        if let Some(client) = cache.get(proxy_url) {
            return Ok(client.clone());
        }

        let client = build_client(Some(proxy_url), self.config.request_timeout_secs)?;
        cache.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }

    /// GET 요청을 보내고 JSON으로 파싱합니다.
    ///
    /// rate limit은 상태 코드(429, 999)를 우선 확인하고, 상태 코드가
    /// 일반 오류인 경우에만 응답 본문 휴리스틱을 보조로 사용합니다.
    async fn get_json(&self, url: &str, proxy: Option<&str>) -> Result<Value> {
        let client = self.client_for(proxy)?;

        let response = client
            .get(url)
            .header("User-Agent", random_user_agent())
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 999 {
            return Err(DataError::RateLimited(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_rate_limit_text(&body) {
                return Err(DataError::RateLimited(format!("HTTP {}", status)));
            }
            return Err(DataError::FetchError(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DataError::ParseError(e.to_string()))
    }

    /// fast 엔드포인트 조회 (차트 메타데이터 요약).
    async fn fetch_fast(&self, ticker: &str, proxy: Option<&str>) -> Result<Quote> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1d",
            self.config.base_url, ticker
        );
        let value = self.get_json(&url, proxy).await?;
        parse_fast_payload(ticker, &value)
    }

    /// full 엔드포인트 조회 (상세 페이로드).
    async fn fetch_full(&self, ticker: &str, proxy: Option<&str>) -> Result<Quote> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules=price,summaryDetail",
            self.config.base_url, ticker
        );
        let value = self.get_json(&url, proxy).await?;
        parse_full_payload(ticker, &value)
    }
}

#[async_trait]
impl QuoteFetcher for YahooQuoteClient {
    async fn fetch_quote(&self, ticker: &str, proxy: Option<&str>) -> Result<Quote> {
        match self.fetch_fast(ticker, proxy).await {
            Ok(quote) if quote.is_valid() => Ok(quote),
            Ok(_) if self.config.full_fallback => {
                tracing::debug!(ticker = ticker, "fast 응답에 유효한 가격 없음, full 폴백");
                validate(self.fetch_full(ticker, proxy).await?)
            }
            Ok(quote) => validate(quote),
            // rate limit / 타임아웃 / 전송 오류는 폴백하지 않고 그대로
            // 보고하여 다른 프록시로 재시도하게 함
            Err(e @ (DataError::RateLimited(_) | DataError::Timeout(_) | DataError::FetchError(_))) => {
                Err(e)
            }
            Err(e) if self.config.full_fallback => {
                tracing::debug!(ticker = ticker, error = %e, "fast 파싱 실패, full 폴백");
                validate(self.fetch_full(ticker, proxy).await?)
            }
            Err(e) => Err(e),
        }
    }
}

/// 가격이 없는 스냅샷을 수집 실패로 변환합니다.
fn validate(quote: Quote) -> Result<Quote> {
    if quote.is_valid() {
        Ok(quote)
    } else {
        Err(DataError::InvalidData(format!(
            "{}: 가격이 없거나 0 이하",
            quote.ticker
        )))
    }
}

/// fast(v8 chart) 페이로드 파싱.
fn parse_fast_payload(ticker: &str, value: &Value) -> Result<Quote> {
    let result = value["chart"]["result"]
        .get(0)
        .ok_or_else(|| chart_error(ticker, value))?;
    let meta = &result["meta"];

    let price = field_decimal(meta, &["regularMarketPrice", "currentPrice", "price"])
        .ok_or_else(|| DataError::InvalidData(format!("{}: 가격 필드 없음", ticker)))?;

    Ok(Quote {
        ticker: ticker.to_string(),
        price,
        previous_close: field_decimal(meta, &["chartPreviousClose", "previousClose"]),
        open: field_decimal(meta, &["regularMarketOpen", "open"]),
        day_high: field_decimal(meta, &["regularMarketDayHigh", "dayHigh"]),
        day_low: field_decimal(meta, &["regularMarketDayLow", "dayLow"]),
        volume: field_i64(meta, &["regularMarketVolume", "volume"]),
        avg_volume: field_i64(meta, &["averageDailyVolume3Month", "averageVolume"]),
        market_cap: field_decimal(meta, &["marketCap"]),
        currency: field_str(meta, &["currency"]),
        tier: QuoteTier::Fast,
        fetched_at: Utc::now(),
    })
}

/// full(v10 quoteSummary) 페이로드 파싱.
fn parse_full_payload(ticker: &str, value: &Value) -> Result<Quote> {
    let result = value["quoteSummary"]["result"]
        .get(0)
        .ok_or_else(|| DataError::InvalidData(format!("{}: quoteSummary 결과 없음", ticker)))?;
    let price_module = &result["price"];
    let detail = &result["summaryDetail"];

    let price = field_decimal(price_module, &["regularMarketPrice", "currentPrice"])
        .or_else(|| field_decimal(detail, &["regularMarketPrice"]))
        .ok_or_else(|| DataError::InvalidData(format!("{}: 가격 필드 없음", ticker)))?;

    Ok(Quote {
        ticker: ticker.to_string(),
        price,
        previous_close: field_decimal(detail, &["previousClose", "regularMarketPreviousClose"])
            .or_else(|| field_decimal(price_module, &["regularMarketPreviousClose"])),
        open: field_decimal(detail, &["open", "regularMarketOpen"]),
        day_high: field_decimal(detail, &["dayHigh", "regularMarketDayHigh"]),
        day_low: field_decimal(detail, &["dayLow", "regularMarketDayLow"]),
        volume: field_i64(detail, &["volume", "regularMarketVolume"]),
        avg_volume: field_i64(detail, &["averageVolume", "averageDailyVolume3Month"]),
        market_cap: field_decimal(detail, &["marketCap"])
            .or_else(|| field_decimal(price_module, &["marketCap"])),
        currency: field_str(price_module, &["currency"])
            .or_else(|| field_str(detail, &["currency"])),
        tier: QuoteTier::Full,
        fetched_at: Utc::now(),
    })
}

/// chart 응답의 오류 블록을 DataError로 변환합니다.
fn chart_error(ticker: &str, value: &Value) -> DataError {
    let description = value["chart"]["error"]["description"]
        .as_str()
        .unwrap_or("chart 결과 없음");
    if is_rate_limit_text(description) {
        DataError::RateLimited(description.to_string())
    } else {
        DataError::InvalidData(format!("{}: {}", ticker, description))
    }
}

/// 숫자 필드를 여러 후보 이름으로 추출합니다.
///
/// `{"raw": 1.23}` 래핑 객체, 순수 숫자, 숫자 문자열을 모두
/// 허용합니다 (업스트림 페이로드 형식이 엔드포인트마다 다름).
fn field_decimal(obj: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| value_to_decimal(&obj[*k]))
}

fn field_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| {
        let v = unwrap_raw(&obj[*k]);
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn field_str(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj[*k].as_str().map(|s| s.to_string()))
}

fn value_to_decimal(v: &Value) -> Option<Decimal> {
    let v = unwrap_raw(v);
    if let Some(f) = v.as_f64() {
        Decimal::try_from(f).ok()
    } else if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        None
    }
}

/// `{"raw": ..., "fmt": ...}` 래핑을 벗깁니다.
fn unwrap_raw(v: &Value) -> &Value {
    if v.is_object() {
        &v["raw"]
    } else {
        v
    }
}

/// rate limit 응답 본문 휴리스틱 (상태 코드 분류의 보조 수단).
fn is_rate_limit_text(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("too many requests") || lower.contains("rate limit")
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// 프록시 경유 여부에 따라 reqwest 클라이언트를 생성합니다.
fn build_client(proxy: Option<&str>, timeout_secs: u64) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));

    if let Some(url) = proxy {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| DataError::ConfigError(format!("프록시 URL 파싱 실패 ({}): {}", url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DataError::ConfigError(format!("HTTP 클라이언트 생성 실패: {}", e)))
}
