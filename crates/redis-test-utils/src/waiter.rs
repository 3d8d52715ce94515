//! Polling helpers for values that show up in Redis eventually.
//!
//! The loop is strictly sequential: attempt, check, sleep, attempt again.
//! Errors returned by the polled operation count as a failed attempt and are
//! never surfaced; running out of attempts is not an error either.

use std::{fmt, future::Future, time::Duration};

use tracing::{debug, info};

use crate::client::RedisClient;

impl RedisClient {
    /// Polls `operation` until `predicate` accepts its result.
    ///
    /// `retries` is the total number of attempts (at least one is always made)
    /// and defaults to the client's configured retry count; `interval` is the
    /// pause between attempts and defaults to the configured interval.
    /// Returns `None` once every attempt has been used up.
    ///
    /// ```no_run
    /// # use redis_test_utils::RedisClient;
    /// # async fn example(client: RedisClient) {
    /// let key = "order:42".to_string();
    /// let value = client
    ///     .wait_for(
    ///         move |c| {
    ///             let key = key.clone();
    ///             async move { c.get_string(0, &key).await }
    ///         },
    ///         |r| r.is_some(),
    ///         Some(5),
    ///         None,
    ///     )
    ///     .await;
    /// # }
    /// ```
    pub async fn wait_for<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        predicate: P,
        retries: Option<u32>,
        interval: Option<Duration>,
    ) -> Option<T>
    where
        F: FnMut(RedisClient) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&T) -> bool,
    {
        let retries = retries.unwrap_or_else(|| self.retry_count()).max(1);
        let interval = interval.unwrap_or_else(|| self.interval());

        let mut attempts = 0;
        let mut outcome = None;
        while attempts < retries {
            attempts += 1;
            match operation(self.clone()).await {
                Ok(result) if predicate(&result) => {
                    outcome = Some(result);
                    break;
                }
                Ok(_) => {
                    debug!(client = %self.name(), attempt = attempts, "result rejected by predicate");
                }
                Err(e) => {
                    debug!(client = %self.name(), attempt = attempts, error = %e, "attempt failed");
                }
            }
            if attempts < retries {
                tokio::time::sleep(interval).await;
            }
        }

        info!(
            client = %self.name(),
            attempts,
            satisfied = outcome.is_some(),
            "wait_and_get succeeded"
        );
        outcome
    }

    /// Like [`RedisClient::wait_for`] but returns `T::default()` on exhaustion.
    ///
    /// A default result cannot be told apart from a satisfying result that
    /// happens to equal the default, so predicates should reject it when the
    /// difference matters.
    pub async fn wait_and_get<T, E, F, Fut, P>(
        &self,
        operation: F,
        predicate: P,
        retries: Option<u32>,
        interval: Option<Duration>,
    ) -> T
    where
        T: Default,
        F: FnMut(RedisClient) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&T) -> bool,
    {
        self.wait_for(operation, predicate, retries, interval)
            .await
            .unwrap_or_default()
    }
}
