use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::utils::error::CapabilityError;

/// Per-capability concurrency caps shared by every in-flight turn.
#[derive(Clone)]
pub struct Limiters {
    pub generation: Arc<Semaphore>,
    pub search: Arc<Semaphore>,
    pub retrieval: Arc<Semaphore>,
    pub weather: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &crate::config::settings::LimitsConfig) -> Self {
        Self {
            generation: Arc::new(Semaphore::new(cfg.generation_concurrency.max(1))),
            search: Arc::new(Semaphore::new(cfg.search_concurrency.max(1))),
            retrieval: Arc::new(Semaphore::new(cfg.retrieval_concurrency.max(1))),
            weather: Arc::new(Semaphore::new(cfg.weather_concurrency.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
        }
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration), CapabilityError> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| CapabilityError::Unavailable(op))?
            .map_err(|_| CapabilityError::Unavailable(op))?;

        Ok((permit, start.elapsed()))
    }

    /// Hold a permit of `sem` for the whole call and bound the call itself by `call_timeout`.
    pub async fn run<T, F>(
        &self,
        sem: &Arc<Semaphore>,
        op: &'static str,
        call_timeout: Duration,
        fut: F,
    ) -> Result<T, CapabilityError>
    where
        F: Future<Output = Result<T, CapabilityError>>,
    {
        let (_permit, waited) = Self::acquire_timed(sem.clone(), self.acquire_timeout, op).await?;
        if waited > Duration::from_millis(250) {
            tracing::debug!(op, waited_ms = waited.as_millis() as u64, "limiter wait");
        }
        with_timeout(op, call_timeout, fut).await?
    }
}

pub async fn with_timeout<T, F>(
    op: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, CapabilityError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| CapabilityError::Timeout { op, after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LimitsConfig;

    fn limiters(acquire_timeout_ms: u64) -> Limiters {
        Limiters::new(&LimitsConfig {
            generation_concurrency: 1,
            search_concurrency: 1,
            retrieval_concurrency: 1,
            weather_concurrency: 1,
            acquire_timeout_ms,
        })
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let limiters = limiters(20);
        let _held = limiters.search.clone().acquire_owned().await.unwrap();

        let result = Limiters::acquire_timed(
            limiters.search.clone(),
            limiters.acquire_timeout,
            "search",
        )
        .await;

        assert!(matches!(result, Err(CapabilityError::Unavailable("search"))));
    }

    #[tokio::test]
    async fn test_run_releases_permit_after_call() {
        let limiters = limiters(100);
        let sem = limiters.generation.clone();

        let value = limiters
            .run(&sem, "generation", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_with_timeout_reports_operation() {
        let result = with_timeout("weather", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert!(matches!(result, Err(CapabilityError::Timeout { op: "weather", .. })));
    }
}
