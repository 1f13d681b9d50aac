//! 스캔 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 스캔 작업 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// 총 대상 티커 수
    pub total: usize,
    /// 성공 (수집 및 저장 완료)
    pub success: usize,
    /// 실패 (재시도 소진 또는 저장 실패)
    pub failed: usize,
    /// 검증 실패 (가격 누락 / 0 이하)
    pub invalid: usize,
    /// 건너뜀 (종료 요청 또는 이미 최신)
    pub skipped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ScanStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%)
    ///
    /// 건너뛴 티커는 분모에서 제외합니다.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total.saturating_sub(self.skipped);
        if attempted == 0 {
            0.0
        } else {
            (self.success as f64 / attempted as f64) * 100.0
        }
    }

    /// 처리량 (티커/초)
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total.saturating_sub(self.skipped) as f64 / secs
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            failed = self.failed,
            invalid = self.invalid,
            skipped = self.skipped,
            success_rate = format!("{:.1}%", self.success_rate()),
            throughput = format!("{:.1}/s", self.throughput()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "스캔 완료"
        );
    }
}
