//! 종목 메타데이터 및 최신 시세 스냅샷 repository.
//!
//! 두 테이블 모두 티커를 키로 하는 upsert로 갱신합니다.
//! 같은 페이로드를 재처리해도 같은 행 값이 됩니다 (멱등).

use crate::error::{DataError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scanner_core::{Quote, StockMeta};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

// =============================================================================
// Stock Repository
// =============================================================================

/// 종목 메타데이터 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct StockRecord {
    pub id: Uuid,
    pub ticker: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 종목 메타데이터 repository.
#[derive(Clone)]
pub struct StockRepository {
    pool: PgPool,
}

impl StockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 종목 메타데이터 upsert.
    ///
    /// 이미 존재하는 티커는 메타데이터만 갱신하고 활성화합니다.
    #[instrument(skip(self, meta), fields(ticker = %meta.ticker))]
    pub async fn upsert(&self, meta: &StockMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (id, ticker, name, exchange, sector, is_active, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (ticker) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, stock.name),
                exchange = COALESCE(EXCLUDED.exchange, stock.exchange),
                sector = COALESCE(EXCLUDED.sector, stock.sector),
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(&meta.ticker)
        .bind(meta.name.as_deref())
        .bind(meta.exchange.as_deref())
        .bind(meta.sector.as_deref())
        .bind(meta.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 티커로 단일 종목 조회.
    pub async fn get(&self, ticker: &str) -> Result<Option<StockRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT id, ticker, name, exchange, sector, is_active, created_at, updated_at
            FROM stock
            WHERE ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 활성 종목 티커 목록 조회 (티커 오름차순).
    pub async fn list_active_tickers(&self, limit: Option<i64>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = match limit {
            Some(limit) => {
                sqlx::query_as(
                    "SELECT ticker FROM stock WHERE is_active = true ORDER BY ticker LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT ticker FROM stock WHERE is_active = true ORDER BY ticker")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// 전체 종목 수.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// StockPrice Repository
// =============================================================================

/// 최신 시세 스냅샷 레코드 (티커당 1행).
#[derive(Debug, Clone, FromRow)]
pub struct StockPriceRecord {
    pub ticker: String,
    pub price: Decimal,
    pub previous_close: Option<Decimal>,
    pub open: Option<Decimal>,
    pub day_high: Option<Decimal>,
    pub day_low: Option<Decimal>,
    pub volume: Option<i64>,
    pub avg_volume: Option<i64>,
    /// 당일 거래량 / 평균 거래량 (DVAV)
    pub volume_ratio: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub currency: Option<String>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 최신 시세 스냅샷 repository.
#[derive(Clone)]
pub struct StockPriceRepository {
    pool: PgPool,
}

impl StockPriceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 시세 스냅샷 upsert.
    ///
    /// DVAV(거래량 비율)는 저장 시점에 계산합니다. 같은 티커의
    /// 이전 스냅샷은 덮어씁니다.
    #[instrument(skip(self, quote), fields(ticker = %quote.ticker))]
    pub async fn upsert_quote(&self, quote: &Quote) -> Result<()> {
        if !quote.is_valid() {
            return Err(DataError::InvalidData(format!(
                "{}: 가격이 없거나 0 이하",
                quote.ticker
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO stock_price (
                ticker, price, previous_close, open, day_high, day_low,
                volume, avg_volume, volume_ratio, market_cap, currency,
                source, fetched_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (ticker) DO UPDATE SET
                price = EXCLUDED.price,
                previous_close = EXCLUDED.previous_close,
                open = EXCLUDED.open,
                day_high = EXCLUDED.day_high,
                day_low = EXCLUDED.day_low,
                volume = EXCLUDED.volume,
                avg_volume = EXCLUDED.avg_volume,
                volume_ratio = EXCLUDED.volume_ratio,
                market_cap = EXCLUDED.market_cap,
                currency = EXCLUDED.currency,
                source = EXCLUDED.source,
                fetched_at = EXCLUDED.fetched_at,
                updated_at = NOW()
            "#,
        )
        .bind(&quote.ticker)
        .bind(quote.price)
        .bind(quote.previous_close)
        .bind(quote.open)
        .bind(quote.day_high)
        .bind(quote.day_low)
        .bind(quote.volume)
        .bind(quote.avg_volume)
        .bind(quote.volume_ratio())
        .bind(quote.market_cap)
        .bind(quote.currency.as_deref())
        .bind(quote.tier.as_str())
        .bind(quote.fetched_at)
        .execute(&self.pool)
        .await?;

        debug!(ticker = %quote.ticker, price = %quote.price, "시세 스냅샷 저장");

        Ok(())
    }

    /// 티커로 최신 스냅샷 조회.
    pub async fn get(&self, ticker: &str) -> Result<Option<StockPriceRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT ticker, price, previous_close, open, day_high, day_low,
                   volume, avg_volume, volume_ratio, market_cap, currency,
                   source, fetched_at, updated_at
            FROM stock_price
            WHERE ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 저장된 스냅샷 수.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_price")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
