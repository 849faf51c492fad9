use std::{fmt::Display, future::Future, time::Duration};

/// Fixed-backoff retry. `max_attempts: None` retries forever: only process shutdown ends it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn forever(backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: None,
            backoff,
        }
    }

    pub const fn limited(max_attempts: u32, backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.max_attempts.map_or(true, |max| attempt < max) => {
                    tracing::warn!(
                        "{what} failed (attempt {attempt}): {err}; retrying in {:?}",
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let start = Instant::now();
        let result: Result<u32, String> = RetryPolicy::forever(Duration::from_secs(1))
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 5 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(5));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = RetryPolicy::limited(3, Duration::from_millis(10))
            .run("hopeless", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;
        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
