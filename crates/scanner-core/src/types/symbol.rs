//! 종목 메타데이터 정의.

use serde::{Deserialize, Serialize};

/// 스캔 대상 종목의 메타데이터.
///
/// 티커는 대문자로 정규화하여 저장합니다. DB의 `stock` 테이블과
/// 1:1로 대응됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMeta {
    /// 티커 심볼 (예: "AAPL")
    pub ticker: String,
    /// 종목명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 거래소 (예: "NASDAQ", "NYSE")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// 섹터
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// 활성 여부 (비활성 종목은 스캔 대상에서 제외)
    pub is_active: bool,
}

impl StockMeta {
    /// 티커만으로 메타데이터를 생성합니다.
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: normalize_ticker(&ticker.into()),
            name: None,
            exchange: None,
            sector: None,
            is_active: true,
        }
    }

    /// 종목명을 설정합니다.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 거래소를 설정합니다.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// 섹터를 설정합니다.
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }
}

/// 티커 심볼 정규화 (공백 제거, 대문자 변환).
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// 티커 심볼 형식 검사.
///
/// 1~10자의 영숫자와 일부 구분 문자(`.`, `-`)만 허용합니다.
/// 업스트림 API에 넘기기 전의 최소한의 형식 방어입니다.
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= 10
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" aapl "), "AAPL");
        assert_eq!(normalize_ticker("brk.b"), "BRK.B");
    }

    #[test]
    fn test_is_valid_ticker() {
        assert!(is_valid_ticker("AAPL"));
        assert!(is_valid_ticker("BRK.B"));
        assert!(is_valid_ticker("BF-B"));
        assert!(!is_valid_ticker(""));
        assert!(!is_valid_ticker("TOOLONGTICKER"));
        assert!(!is_valid_ticker("AAPL;DROP"));
    }

    #[test]
    fn test_stock_meta_builder() {
        let meta = StockMeta::new("msft")
            .with_name("Microsoft Corporation")
            .with_exchange("NASDAQ");

        assert_eq!(meta.ticker, "MSFT");
        assert_eq!(meta.name.as_deref(), Some("Microsoft Corporation"));
        assert_eq!(meta.exchange.as_deref(), Some("NASDAQ"));
        assert!(meta.is_active);
    }
}
