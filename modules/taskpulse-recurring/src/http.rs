//! HTTP implementation of [`TaskService`].
//!
//! Every call gets a per-request timeout, jittered exponential backoff over
//! transient failures, and a circuit breaker shared across calls. 4xx
//! responses other than 408/429 are definitive and never retried.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use taskpulse_common::{RetryPolicy, TaskSnapshot};

use crate::breaker::CircuitBreaker;
use crate::config::RecurringConfig;
use crate::task_service::{CreateTaskRequest, TaskService, TaskServiceError};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Deserialize)]
struct CreatedTask {
    id: Uuid,
}

pub struct HttpTaskService {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl HttpTaskService {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
            retry,
            breaker,
        })
    }

    pub fn from_config(config: &RecurringConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.task_service_url.clone(),
            config.task_service_token.clone(),
            config.timeout,
            config.retry,
            CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown),
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> TaskServiceError {
        if err.is_timeout() {
            TaskServiceError::Timeout(self.timeout)
        } else {
            TaskServiceError::Transient(err.to_string())
        }
    }

    async fn status_error(resp: reqwest::Response) -> TaskServiceError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            TaskServiceError::Validation {
                status: status.as_u16(),
                body,
            }
        } else {
            TaskServiceError::Transient(format!("status {}: {}", status.as_u16(), body))
        }
    }

    /// Run `attempt` under the retry policy and breaker.
    async fn with_retries<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, TaskServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskServiceError>>,
    {
        let mut n = 1;
        loop {
            if !self.breaker.allow() {
                return Err(TaskServiceError::CircuitOpen);
            }

            match attempt().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    // The service answered; it is healthy even if the request is not.
                    self.breaker.record_success();
                    return Err(e);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    if !self.retry.allows_retry_after(n) {
                        warn!(op, attempts = n, error = %e, "Task service call failed, retries exhausted");
                        return Err(e);
                    }
                    let delay = self.retry.jittered_delay_after(n);
                    debug!(op, attempt = n, delay_ms = delay.as_millis() as u64, error = %e, "Retrying task service call");
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
            }
        }
    }

    async fn fetch_task(&self, task_id: Uuid) -> Result<Option<TaskSnapshot>, TaskServiceError> {
        let url = format!("{}/api/tasks/{}", self.base_url, task_id);
        let resp = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        resp.json::<TaskSnapshot>()
            .await
            .map(Some)
            .map_err(|e| TaskServiceError::Transient(format!("unreadable task response: {e}")))
    }

    async fn post_task(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: Uuid,
    ) -> Result<Uuid, TaskServiceError> {
        let url = format!("{}/api/tasks", self.base_url);
        let resp = self
            .request(self.client.post(&url))
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        resp.json::<CreatedTask>()
            .await
            .map(|created| created.id)
            .map_err(|e| TaskServiceError::Transient(format!("unreadable create response: {e}")))
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskSnapshot>, TaskServiceError> {
        self.with_retries("get_task", || self.fetch_task(task_id)).await
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: Uuid,
    ) -> Result<Uuid, TaskServiceError> {
        self.with_retries("create_task", || self.post_task(request, idempotency_key))
            .await
    }
}
