//! 프록시 풀 및 프록시별 상태 추적기.
//!
//! 프록시마다 상태 머신 하나가 대응됩니다:
//!
//! ```text
//! Available ──record_rate_limit──▶ RateLimited ──cooldown 경과──▶ Available
//!     │
//!     ├──연속 실패 N회──▶ CircuitOpen ──timeout 경과──▶ Available
//!     │
//!     └──성공률 저하──▶ Disabled ──record_success──▶ Available
//! ```
//!
//! `get_next`는 커서에서 전방 탐색하며 부적격 프록시를 건너뛰고,
//! 풀 전체를 한 바퀴 돌아도 적격 프록시가 없으면 `None`을
//! 반환합니다 (호출자는 직접 연결로 폴백). 모든 카운터는 프로세스
//! 단일 락 뒤에 있으며 재시작 간에 유지되지 않습니다.

use super::config::ProxyEndpoint;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// 프록시 풀 동작 설정.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// circuit breaker 개방 기준 연속 실패 횟수
    pub max_consecutive_failures: u32,
    /// circuit breaker 개방 유지 시간 (초)
    pub circuit_open_secs: u64,
    /// rate limit 쿨다운 시간 (초)
    pub rate_limit_cooldown_secs: u64,
    /// 요청 상한 윈도우당 프록시별 최대 요청 수 (선제 로테이션)
    pub request_cap: u32,
    /// 요청 상한 윈도우 길이 (초)
    pub cap_window_secs: u64,
    /// 성공률 판정에 필요한 최소 표본 수
    pub min_samples: u64,
    /// 이 값 미만의 성공률이면 프록시 비활성화 (0.0 ~ 1.0)
    pub success_rate_floor: f64,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            circuit_open_secs: 300,
            rate_limit_cooldown_secs: 120,
            request_cap: 30,
            cap_window_secs: 60,
            min_samples: 20,
            success_rate_floor: 0.3,
        }
    }
}

/// 프록시별 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// 사용 가능
    Available,
    /// rate limit 쿨다운 중
    RateLimited { until: Instant },
    /// circuit breaker 개방 (연속 실패)
    CircuitOpen { until: Instant },
    /// 성공률 저하로 비활성화 (성공 기록 시 해제)
    Disabled,
}

/// 프록시 하나의 건강 상태.
#[derive(Debug)]
struct ProxyHealth {
    endpoint: ProxyEndpoint,
    state: ProxyState,
    consecutive_failures: u32,
    success_count: u64,
    failure_count: u64,
    window_started: Instant,
    window_requests: u32,
    last_used: Option<Instant>,
}

impl ProxyHealth {
    fn new(endpoint: ProxyEndpoint, now: Instant) -> Self {
        Self {
            endpoint,
            state: ProxyState::Available,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
            window_started: now,
            window_requests: 0,
            last_used: None,
        }
    }

    /// 시간 경과로 만료된 상태를 Available로 되돌립니다.
    fn refresh(&mut self, now: Instant) {
        match self.state {
            ProxyState::RateLimited { until } | ProxyState::CircuitOpen { until }
                if now >= until =>
            {
                self.state = ProxyState::Available;
            }
            _ => {}
        }
    }

    /// 현재 대여 가능한지 판정합니다.
    fn is_eligible(&mut self, now: Instant, config: &ProxyPoolConfig) -> bool {
        self.refresh(now);

        if self.state != ProxyState::Available {
            return false;
        }

        // 요청 상한 윈도우 갱신
        if now.duration_since(self.window_started) >= Duration::from_secs(config.cap_window_secs)
        {
            self.window_started = now;
            self.window_requests = 0;
        }

        let cap = self.endpoint.max_requests.unwrap_or(config.request_cap);
        self.window_requests < cap
    }

    fn samples(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn success_rate(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            1.0
        } else {
            self.success_count as f64 / samples as f64
        }
    }
}

/// 풀 상태 요약 (진행 로그용).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub total: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub circuit_open: usize,
    pub disabled: usize,
}

struct PoolInner {
    proxies: Vec<ProxyHealth>,
    cursor: usize,
}

/// 프록시 풀.
///
/// 내부 카운터는 프로세스 단일 락으로 보호됩니다. 프록시 상태는
/// 메모리에만 존재하며 프로세스 간에 공유되지 않습니다.
pub struct ProxyPool {
    config: ProxyPoolConfig,
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    /// 엔드포인트 목록으로 풀을 생성합니다.
    pub fn new(endpoints: Vec<ProxyEndpoint>, config: ProxyPoolConfig) -> Self {
        let now = Instant::now();
        let proxies = endpoints
            .into_iter()
            .map(|e| ProxyHealth::new(e, now))
            .collect();

        Self {
            config,
            inner: Mutex::new(PoolInner { proxies, cursor: 0 }),
        }
    }

    /// 풀의 프록시 개수.
    pub fn len(&self) -> usize {
        self.lock().proxies.len()
    }

    /// 프록시가 하나도 없으면 true.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 다음 프록시를 대여합니다.
    ///
    /// 커서에서 전방으로 풀을 한 바퀴 탐색하며 적격 프록시를
    /// 찾습니다. 비활성, rate limit 쿨다운, circuit 개방, 요청 상한
    /// 초과 상태는 건너뜁니다. 적격 프록시가 없으면 `None`을
    /// 반환합니다 — 호출자는 프록시 없이 직접 연결해야 합니다.
    pub fn get_next(&self) -> Option<String> {
        let mut inner = self.lock();
        let n = inner.proxies.len();
        if n == 0 {
            return None;
        }

        let now = Instant::now();
        let start = inner.cursor % n;

        for i in 0..n {
            let idx = (start + i) % n;
            let health = &mut inner.proxies[idx];
            if health.is_eligible(now, &self.config) {
                health.window_requests += 1;
                health.last_used = Some(now);
                let url = health.endpoint.url.clone();
                // 랜덤 스킵으로 부하 분산
                let skip = rand::thread_rng().gen_range(0..=1);
                inner.cursor = (idx + 1 + skip) % n;
                return Some(url);
            }
        }

        None
    }

    /// 성공을 기록합니다.
    ///
    /// 연속 실패 카운터를 초기화하고, 성공률 저하로 비활성화된
    /// 프록시는 다시 사용 가능 상태로 되돌립니다.
    pub fn record_success(&self, url: &str) {
        let mut inner = self.lock();
        if let Some(health) = find_proxy(&mut inner.proxies, url) {
            health.consecutive_failures = 0;
            health.success_count += 1;
            if health.state == ProxyState::Disabled {
                health.state = ProxyState::Available;
                tracing::debug!(proxy = url, "프록시 비활성화 해제");
            }
        }
    }

    /// 실패를 기록합니다.
    ///
    /// 연속 실패가 기준치에 도달하면 circuit breaker를 개방하고,
    /// 표본이 충분한 상태에서 성공률이 바닥값 아래로 떨어지면
    /// 프록시를 비활성화합니다.
    pub fn record_failure(&self, url: &str) {
        let mut inner = self.lock();
        let config = &self.config;
        if let Some(health) = find_proxy(&mut inner.proxies, url) {
            health.consecutive_failures += 1;
            health.failure_count += 1;

            if health.consecutive_failures >= config.max_consecutive_failures {
                health.state = ProxyState::CircuitOpen {
                    until: Instant::now() + Duration::from_secs(config.circuit_open_secs),
                };
                health.consecutive_failures = 0;
                tracing::warn!(
                    proxy = url,
                    timeout_secs = config.circuit_open_secs,
                    "연속 실패로 circuit breaker 개방"
                );
            } else if health.samples() >= config.min_samples
                && health.success_rate() < config.success_rate_floor
            {
                health.state = ProxyState::Disabled;
                tracing::warn!(
                    proxy = url,
                    success_rate = format!("{:.1}%", health.success_rate() * 100.0),
                    "성공률 저하로 프록시 비활성화"
                );
            }
        }
    }

    /// rate limit을 기록합니다.
    ///
    /// 실패 카운터와 독립적으로 쿨다운 시간 동안 해당 프록시를
    /// 대여 대상에서 제외합니다.
    pub fn record_rate_limit(&self, url: &str) {
        let mut inner = self.lock();
        let cooldown = Duration::from_secs(self.config.rate_limit_cooldown_secs);
        if let Some(health) = find_proxy(&mut inner.proxies, url) {
            health.state = ProxyState::RateLimited {
                until: Instant::now() + cooldown,
            };
            tracing::debug!(
                proxy = url,
                cooldown_secs = self.config.rate_limit_cooldown_secs,
                "프록시 rate limit 쿨다운 시작"
            );
        }
    }

    /// 상태별 프록시 수 요약을 반환합니다.
    pub fn snapshot(&self) -> PoolSnapshot {
        let mut inner = self.lock();
        let now = Instant::now();
        let mut snapshot = PoolSnapshot {
            total: inner.proxies.len(),
            ..Default::default()
        };

        for health in inner.proxies.iter_mut() {
            health.refresh(now);
            match health.state {
                ProxyState::Available => snapshot.available += 1,
                ProxyState::RateLimited { .. } => snapshot.rate_limited += 1,
                ProxyState::CircuitOpen { .. } => snapshot.circuit_open += 1,
                ProxyState::Disabled => snapshot.disabled += 1,
            }
        }

        snapshot
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("proxy pool lock poisoned")
    }
}

fn find_proxy<'a>(proxies: &'a mut [ProxyHealth], url: &str) -> Option<&'a mut ProxyHealth> {
    proxies.iter_mut().find(|h| h.endpoint.url == url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(urls: &[&str], config: ProxyPoolConfig) -> ProxyPool {
        let endpoints = urls.iter().map(|u| ProxyEndpoint::new(*u)).collect();
        ProxyPool::new(endpoints, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_returns_none() {
        let pool = pool_of(&[], ProxyPoolConfig::default());
        assert_eq!(pool.get_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_after_consecutive_failures() {
        let pool = pool_of(&["http://p1:8080"], ProxyPoolConfig::default());

        for _ in 0..5 {
            pool.record_failure("http://p1:8080");
        }

        // circuit 개방 중에는 대여 불가
        assert_eq!(pool.get_next(), None);
        assert_eq!(pool.snapshot().circuit_open, 1);

        // 299초 경과: 아직 개방 상태
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(pool.get_next(), None);

        // 300초 경과: 다시 적격
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.get_next(), Some("http://p1:8080".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let pool = pool_of(&["http://p1:8080"], ProxyPoolConfig::default());

        for _ in 0..4 {
            pool.record_failure("http://p1:8080");
        }
        pool.record_success("http://p1:8080");
        for _ in 0..4 {
            pool.record_failure("http://p1:8080");
        }

        // 중간 성공으로 연속 실패가 초기화되어 circuit은 닫혀 있음
        assert_eq!(pool.get_next(), Some("http://p1:8080".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_cooldown() {
        let pool = pool_of(&["http://p1:8080"], ProxyPoolConfig::default());

        pool.record_rate_limit("http://p1:8080");
        assert_eq!(pool.get_next(), None);
        assert_eq!(pool.snapshot().rate_limited, 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(pool.get_next(), Some("http://p1:8080".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_ineligible_returns_none() {
        let pool = pool_of(
            &["http://p1:8080", "http://p2:8080", "http://p3:8080"],
            ProxyPoolConfig::default(),
        );

        pool.record_rate_limit("http://p1:8080");
        pool.record_rate_limit("http://p2:8080");
        for _ in 0..5 {
            pool.record_failure("http://p3:8080");
        }

        assert_eq!(pool.get_next(), None);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.rate_limited, 2);
        assert_eq!(snapshot.circuit_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_success_rate_disables_proxy() {
        let config = ProxyPoolConfig {
            min_samples: 4,
            success_rate_floor: 0.9,
            ..Default::default()
        };
        let pool = pool_of(&["http://p1:8080"], config);

        // 성공/실패를 교차시켜 연속 실패 없이 성공률만 떨어뜨림
        pool.record_success("http://p1:8080");
        pool.record_failure("http://p1:8080");
        pool.record_success("http://p1:8080");
        pool.record_failure("http://p1:8080");

        assert_eq!(pool.snapshot().disabled, 1);
        assert_eq!(pool.get_next(), None);

        // 성공 기록 시 비활성화 해제
        pool.record_success("http://p1:8080");
        assert_eq!(pool.get_next(), Some("http://p1:8080".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_cap_rotates_proxies() {
        let config = ProxyPoolConfig {
            request_cap: 2,
            cap_window_secs: 60,
            ..Default::default()
        };
        let pool = pool_of(&["http://p1:8080", "http://p2:8080"], config);

        // 윈도우 내 상한(프록시당 2회)까지만 대여 가능
        for _ in 0..4 {
            assert!(pool.get_next().is_some());
        }
        assert_eq!(pool.get_next(), None);

        // 윈도우 경과 후 다시 대여 가능
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(pool.get_next().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_independent_of_failure_counter() {
        let pool = pool_of(&["http://p1:8080"], ProxyPoolConfig::default());

        for _ in 0..4 {
            pool.record_failure("http://p1:8080");
        }
        pool.record_rate_limit("http://p1:8080");
        tokio::time::advance(Duration::from_secs(120)).await;

        // 쿨다운이 끝나도 연속 실패 카운터는 유지됨
        assert_eq!(pool.get_next(), Some("http://p1:8080".to_string()));
        pool.record_failure("http://p1:8080");
        assert_eq!(pool.snapshot().circuit_open, 1);
    }
}
