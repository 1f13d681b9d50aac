//! 종목 유니버스 동기화 모듈.
//!
//! CSV 파일에서 티커 유니버스를 읽어 `stock` 테이블에 upsert합니다.
//!
//! CSV 형식: `ticker[,name[,exchange[,sector]]]`
//! 첫 줄이 헤더(`ticker` / `symbol`)이면 건너뜁니다. `#`으로 시작하는
//! 줄은 주석으로 취급합니다.

use crate::{Result, ScanStats, ScannerConfig};
use scanner_core::{is_valid_ticker, normalize_ticker, StockMeta};
use scanner_data::StockRepository;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{info, warn};

/// 종목 유니버스 동기화
pub async fn sync_symbols(pool: &PgPool, config: &ScannerConfig) -> Result<ScanStats> {
    let start = Instant::now();
    let mut stats = ScanStats::new();

    info!("종목 유니버스 동기화 시작");

    let repo = StockRepository::new(pool.clone());

    // 1. 현재 심볼 수 확인
    let current_count = repo.count().await.map_err(crate::CollectorError::from)?;

    info!(
        current_count,
        min = config.symbol_sync.min_symbol_count,
        "종목 수 확인"
    );

    if config.symbol_sync.min_symbol_count > 0 && current_count >= config.symbol_sync.min_symbol_count
    {
        info!("종목 수 충분, 동기화 건너뛰기");
        stats.skipped = 1;
        stats.elapsed = start.elapsed();
        return Ok(stats);
    }

    // 2. CSV 로드
    let csv_path = &config.symbol_sync.csv_path;
    let raw = std::fs::read_to_string(csv_path).map_err(|e| {
        crate::CollectorError::Config(format!("유니버스 CSV 읽기 실패 ({}): {}", csv_path, e))
    })?;

    let metas = parse_universe_csv(&raw);
    info!(path = csv_path, count = metas.len(), "유니버스 CSV 로드 완료");

    // 3. DB upsert
    for meta in &metas {
        stats.total += 1;
        match repo.upsert(meta).await {
            Ok(_) => {
                stats.success += 1;
            }
            Err(e) => {
                stats.failed += 1;
                warn!(
                    ticker = %meta.ticker,
                    error = %e,
                    "종목 저장 실패"
                );
            }
        }
    }

    stats.elapsed = start.elapsed();
    Ok(stats)
}

/// 유니버스 CSV 본문 파싱.
///
/// 잘못된 형식의 티커는 경고 로그 후 건너뜁니다.
pub fn parse_universe_csv(raw: &str) -> Vec<StockMeta> {
    let mut metas = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let first = fields[0];

        // 헤더 행 건너뛰기
        if idx == 0 && (first.eq_ignore_ascii_case("ticker") || first.eq_ignore_ascii_case("symbol"))
        {
            continue;
        }

        let ticker = normalize_ticker(first);
        if !is_valid_ticker(&ticker) {
            warn!(line = idx + 1, raw = first, "잘못된 티커 형식, 건너뜀");
            continue;
        }

        let mut meta = StockMeta::new(ticker);
        if let Some(name) = fields.get(1).filter(|s| !s.is_empty()) {
            meta = meta.with_name(*name);
        }
        if let Some(exchange) = fields.get(2).filter(|s| !s.is_empty()) {
            meta = meta.with_exchange(*exchange);
        }
        if let Some(sector) = fields.get(3).filter(|s| !s.is_empty()) {
            meta = meta.with_sector(*sector);
        }

        metas.push(meta);
    }

    metas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_universe_csv_with_header() {
        let raw = "ticker,name,exchange,sector\n\
                   AAPL,Apple Inc.,NASDAQ,Technology\n\
                   msft,Microsoft Corporation,NASDAQ,\n\
                   JPM,,NYSE,Financial Services\n";

        let metas = parse_universe_csv(raw);
        assert_eq!(metas.len(), 3);
        assert_eq!(metas[0].ticker, "AAPL");
        assert_eq!(metas[0].sector.as_deref(), Some("Technology"));
        assert_eq!(metas[1].ticker, "MSFT");
        assert_eq!(metas[1].sector, None);
        assert_eq!(metas[2].name, None);
        assert_eq!(metas[2].exchange.as_deref(), Some("NYSE"));
    }

    #[test]
    fn test_parse_universe_csv_ticker_only() {
        let raw = "AAPL\nMSFT\n\n# 주석\nGOOG\n";

        let metas = parse_universe_csv(raw);
        let tickers: Vec<&str> = metas.iter().map(|m| m.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT", "GOOG"]);
    }

    #[test]
    fn test_parse_universe_csv_skips_invalid_tickers() {
        let raw = "AAPL\nNOT A TICKER !!\nTOOLONGTICKER99\nBRK.B\n";

        let metas = parse_universe_csv(raw);
        let tickers: Vec<&str> = metas.iter().map(|m| m.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "BRK.B"]);
    }
}
