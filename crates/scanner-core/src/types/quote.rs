//! 시세 스냅샷 타입 정의.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 시세 데이터 계층.
///
/// 업스트림 API는 두 단계의 엔드포인트를 제공합니다:
/// - `Fast`: 작고 빠른 요약 페이로드 (가격, 전일 종가, 거래량)
/// - `Full`: 크고 느린 상세 페이로드 (fast 실패 시 fallback)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteTier {
    /// 요약 엔드포인트
    Fast,
    /// 상세 엔드포인트
    Full,
}

impl QuoteTier {
    /// DB 저장용 문자열 반환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for QuoteTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 단일 종목의 시세 스냅샷.
///
/// 업스트림 페이로드를 방어적으로 파싱한 정규화 결과입니다.
/// 가격 외의 필드는 엔드포인트 계층에 따라 비어 있을 수 있습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 티커 심볼
    pub ticker: String,
    /// 현재가
    pub price: Decimal,
    /// 전일 종가
    pub previous_close: Option<Decimal>,
    /// 당일 시가
    pub open: Option<Decimal>,
    /// 당일 고가
    pub day_high: Option<Decimal>,
    /// 당일 저가
    pub day_low: Option<Decimal>,
    /// 당일 거래량
    pub volume: Option<i64>,
    /// 평균 거래량 (3개월)
    pub avg_volume: Option<i64>,
    /// 시가총액
    pub market_cap: Option<Decimal>,
    /// 통화 (예: "USD")
    pub currency: Option<String>,
    /// 데이터를 가져온 엔드포인트 계층
    pub tier: QuoteTier,
    /// 수집 시각
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// 가격만 채운 최소 스냅샷을 생성합니다.
    pub fn new(ticker: impl Into<String>, price: Decimal, tier: QuoteTier) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            previous_close: None,
            open: None,
            day_high: None,
            day_low: None,
            volume: None,
            avg_volume: None,
            market_cap: None,
            currency: None,
            tier,
            fetched_at: Utc::now(),
        }
    }

    /// 스냅샷 유효성 검사.
    ///
    /// HTTP 호출이 성공했더라도 가격이 없거나 0 이하이면
    /// 수집 실패로 취급합니다.
    pub fn is_valid(&self) -> bool {
        self.price > Decimal::ZERO
    }

    /// 당일 거래량 / 평균 거래량 비율 (DVAV).
    ///
    /// 평균 거래량이 없거나 0이면 `None`을 반환합니다.
    pub fn volume_ratio(&self) -> Option<Decimal> {
        match (self.volume, self.avg_volume) {
            (Some(volume), Some(avg)) if avg > 0 => {
                Some(Decimal::from(volume) / Decimal::from(avg))
            }
            _ => None,
        }
    }

    /// 전일 대비 등락률 (%).
    pub fn change_percent(&self) -> Option<Decimal> {
        match self.previous_close {
            Some(prev) if prev > Decimal::ZERO => {
                Some((self.price - prev) / prev * Decimal::from(100))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_validity() {
        let quote = Quote::new("AAPL", dec!(231.55), QuoteTier::Fast);
        assert!(quote.is_valid());

        let zero = Quote::new("AAPL", dec!(0), QuoteTier::Fast);
        assert!(!zero.is_valid());

        let negative = Quote::new("AAPL", dec!(-1.25), QuoteTier::Full);
        assert!(!negative.is_valid());
    }

    #[test]
    fn test_volume_ratio() {
        let mut quote = Quote::new("TSLA", dec!(250), QuoteTier::Fast);
        assert_eq!(quote.volume_ratio(), None);

        quote.volume = Some(30_000_000);
        quote.avg_volume = Some(10_000_000);
        assert_eq!(quote.volume_ratio(), Some(dec!(3)));

        quote.avg_volume = Some(0);
        assert_eq!(quote.volume_ratio(), None);
    }

    #[test]
    fn test_change_percent() {
        let mut quote = Quote::new("MSFT", dec!(110), QuoteTier::Fast);
        assert_eq!(quote.change_percent(), None);

        quote.previous_close = Some(dec!(100));
        assert_eq!(quote.change_percent(), Some(dec!(10)));
    }
}
