//! 데이터 Provider 모듈.
//!
//! 업스트림 시세 API에서 데이터를 가져오는 Provider들을 정의합니다.
//!
//! ## Yahoo Finance 시세 클라이언트
//! - `YahooQuoteClient`: fast(차트 요약) / full(상세) 2단계 조회
//! - 프록시별 HTTP 클라이언트 캐시, User-Agent 로테이션
//! - 상태 코드 기반 rate limit 분류 (응답 본문 휴리스틱은 보조)
//!
//! ## 시세 조회 추상화
//! - `QuoteFetcher`: 스캔 디스패처가 의존하는 trait 경계

pub mod quote_api;

pub use quote_api::{QuoteFetcher, YahooQuoteClient, YahooQuoteConfig};
