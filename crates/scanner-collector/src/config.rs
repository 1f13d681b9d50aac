//! 환경변수 기반 설정 모듈.

use crate::Result;
use scanner_data::ProxyPoolConfig;
use std::time::Duration;

/// 스캐너 전체 설정
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// 종목 유니버스 동기화 설정
    pub symbol_sync: SymbolSyncConfig,
    /// 시세 스캔 설정
    pub scan: ScanSettings,
    /// 프록시 풀 설정
    pub proxy: ProxySettings,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 종목 유니버스 동기화 설정
#[derive(Debug, Clone)]
pub struct SymbolSyncConfig {
    /// 유니버스 CSV 파일 경로
    pub csv_path: String,
    /// 최소 심볼 수 (이 수 이상이면 동기화 건너뛰기)
    pub min_symbol_count: i64,
}

/// 시세 스캔 설정
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// 동시 워커 수
    pub workers: usize,
    /// 티커당 최대 시도 횟수
    pub retry_attempts: u32,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 재시도 딜레이 기준값 (밀리초, 남은 시도 수에 비례해 축소)
    pub request_delay_ms: u64,
    /// 스캔 대상 티커 수 제한 (없으면 전체)
    pub ticker_limit: Option<i64>,
    /// 진행 로그 출력 간격 (완료 건수)
    pub progress_interval: usize,
}

/// 프록시 풀 설정
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// 프록시 JSON 파일 경로 (없으면 직접 연결만 사용)
    pub file: Option<String>,
    /// rate limit 쿨다운 (초)
    pub rate_limit_cooldown_secs: u64,
    /// circuit breaker 개방 유지 시간 (초)
    pub circuit_open_secs: u64,
    /// circuit breaker 개방 기준 연속 실패 횟수
    pub max_consecutive_failures: u32,
    /// 윈도우당 프록시별 최대 요청 수
    pub request_cap: u32,
    /// 요청 상한 윈도우 길이 (초)
    pub cap_window_secs: u64,
}

/// 데몬 모드 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 워크플로우 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

impl ScannerConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            crate::error::CollectorError::Config(
                "DATABASE_URL 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;

        Ok(Self {
            database_url,
            symbol_sync: SymbolSyncConfig {
                csv_path: std::env::var("SYMBOL_CSV_PATH")
                    .unwrap_or_else(|_| "tickers.csv".to_string()),
                min_symbol_count: env_var_parse("SYMBOL_MIN_COUNT", 0),
            },
            scan: ScanSettings {
                workers: env_var_parse("SCAN_WORKERS", 16),
                retry_attempts: env_var_parse("SCAN_RETRY_ATTEMPTS", 3),
                request_timeout_secs: env_var_parse("SCAN_REQUEST_TIMEOUT_SECS", 8),
                request_delay_ms: env_var_parse("SCAN_REQUEST_DELAY_MS", 200),
                ticker_limit: std::env::var("SCAN_TICKER_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                progress_interval: env_var_parse("SCAN_PROGRESS_INTERVAL", 100),
            },
            proxy: ProxySettings {
                file: std::env::var("PROXY_FILE").ok(),
                rate_limit_cooldown_secs: env_var_parse("PROXY_RATE_LIMIT_COOLDOWN_SECS", 120),
                circuit_open_secs: env_var_parse("PROXY_CIRCUIT_OPEN_SECS", 300),
                max_consecutive_failures: env_var_parse("PROXY_MAX_CONSECUTIVE_FAILURES", 5),
                request_cap: env_var_parse("PROXY_REQUEST_CAP", 30),
                cap_window_secs: env_var_parse("PROXY_CAP_WINDOW_SECS", 60),
            },
            daemon: DaemonConfig {
                interval_minutes: env_var_parse("DAEMON_INTERVAL_MINUTES", 60),
            },
        })
    }
}

impl ProxySettings {
    /// 프록시 풀 동작 설정으로 변환
    pub fn pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            circuit_open_secs: self.circuit_open_secs,
            rate_limit_cooldown_secs: self.rate_limit_cooldown_secs,
            request_cap: self.request_cap,
            cap_window_secs: self.cap_window_secs,
            ..ProxyPoolConfig::default()
        }
    }
}

impl DaemonConfig {
    /// 워크플로우 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_settings_to_pool_config() {
        let settings = ProxySettings {
            file: None,
            rate_limit_cooldown_secs: 60,
            circuit_open_secs: 150,
            max_consecutive_failures: 3,
            request_cap: 10,
            cap_window_secs: 30,
        };

        let config = settings.pool_config();
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.circuit_open_secs, 150);
        assert_eq!(config.rate_limit_cooldown_secs, 60);
        assert_eq!(config.request_cap, 10);
    }
}
