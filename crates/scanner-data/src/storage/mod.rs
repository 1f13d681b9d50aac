//! 저장소 모듈.
//!
//! - `db`: PostgreSQL 연결 풀 래퍼 및 마이그레이션
//! - `stock`: 종목 메타데이터 / 최신 시세 스냅샷 repository

pub mod db;
pub mod stock;

pub use db::{Database, DatabaseConfig};
pub use stock::{StockPriceRecord, StockPriceRepository, StockRecord, StockRepository};
