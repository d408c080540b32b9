//! Outbound webhook delivery — durable queue with bounded retries.
//!
//! Enqueue commits a task row before returning, so a notification owed to
//! a third party survives restarts. A background worker polls for due
//! tasks and attempts delivery with doubling backoff until the task is
//! delivered or its attempts run out. At-least-once semantics:
//! payloads carry the call id as a stable identifier for receiver-side
//! deduplication.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::error::{DatabaseError, WebhookError};
use crate::store::CallStore;

/// How many due tasks one worker pass picks up.
const POLL_BATCH: usize = 25;

/// Transport used to deliver a payload to a URL. Behind a trait so tests
/// can inject failures without a live endpoint.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError>;
}

/// reqwest-backed JSON POST transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(WebhookError::Status {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Enqueues notification tasks and drains them on a background schedule.
pub struct WebhookDispatcher {
    store: Arc<dyn CallStore>,
    transport: Arc<dyn DeliveryTransport>,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn CallStore>,
        transport: Arc<dyn DeliveryTransport>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Enqueue a notification to the configured third-party endpoint.
    /// No-op (returns `None`) when no endpoint is configured.
    pub async fn notify(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Option<i64>, DatabaseError> {
        let Some(url) = self.config.notify_url.clone() else {
            debug!(kind, "No notify URL configured, skipping webhook");
            return Ok(None);
        };
        let id = self.enqueue_to(kind, &url, payload).await?;
        Ok(Some(id))
    }

    /// Durably enqueue a delivery task to an explicit URL, immediately
    /// eligible for the next worker pass.
    pub async fn enqueue_to(
        &self,
        kind: &str,
        url: &str,
        payload: serde_json::Value,
    ) -> Result<i64, DatabaseError> {
        let id = self
            .store
            .enqueue_webhook(kind, url, &payload, self.config.max_attempts, Utc::now())
            .await?;
        debug!(id, kind, url, "Webhook task enqueued");
        Ok(id)
    }

    /// One worker pass: attempt every due task once. Returns how many
    /// tasks were attempted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let due = match self.store.due_webhooks(now, POLL_BATCH).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to poll webhook queue");
                return 0;
            }
        };

        let attempted = due.len();
        for task in due {
            match self.transport.deliver(&task.url, &task.payload).await {
                Ok(()) => {
                    info!(id = task.id, kind = %task.kind, "Webhook delivered");
                    if let Err(e) = self.store.mark_webhook_delivered(task.id).await {
                        error!(id = task.id, error = %e, "Failed to mark webhook delivered");
                    }
                }
                Err(e) => {
                    let attempts = task.attempts + 1;
                    if attempts >= task.max_attempts {
                        warn!(
                            id = task.id,
                            kind = %task.kind,
                            attempts,
                            error = %e,
                            "Webhook exhausted, giving up"
                        );
                        if let Err(e) = self.store.mark_webhook_exhausted(task.id).await {
                            error!(id = task.id, error = %e, "Failed to mark webhook exhausted");
                        }
                    } else {
                        let delay = backoff_delay(self.config.base_delay, attempts);
                        let next = now + delay;
                        warn!(
                            id = task.id,
                            kind = %task.kind,
                            attempts,
                            next_attempt = %next,
                            error = %e,
                            "Webhook delivery failed, retrying"
                        );
                        if let Err(e) = self.store.reschedule_webhook(task.id, attempts, next).await
                        {
                            error!(id = task.id, error = %e, "Failed to reschedule webhook");
                        }
                    }
                }
            }
        }
        attempted
    }
}

/// Delay before the next attempt: doubles on every failure.
fn backoff_delay(base: std::time::Duration, attempts: u32) -> chrono::Duration {
    let factor = 1u32 << (attempts.saturating_sub(1)).min(16);
    chrono::Duration::from_std(base.saturating_mul(factor))
        .unwrap_or_else(|_| chrono::Duration::hours(24))
}

/// Spawn the background delivery worker, polling on the configured
/// interval. Runs independently of request handling.
pub fn spawn_delivery_worker(dispatcher: Arc<WebhookDispatcher>) -> tokio::task::JoinHandle<()> {
    let poll_interval = dispatcher.config.poll_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            dispatcher.run_once(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::store::{LibSqlStore, WebhookStatus};

    /// Transport that fails the first `fail_first` deliveries.
    struct FlakyTransport {
        fail_first: usize,
        calls: AtomicUsize,
        delivered: Mutex<Vec<String>>,
    }

    impl FlakyTransport {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliveryTransport for FlakyTransport {
        async fn deliver(
            &self,
            url: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), WebhookError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(WebhookError::Status { status: 503 });
            }
            self.delivered.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn config(max_attempts: u32, notify_url: Option<&str>) -> WebhookConfig {
        WebhookConfig {
            notify_url: notify_url.map(String::from),
            poll_interval: Duration::from_secs(15),
            base_delay: Duration::from_secs(30),
            max_attempts,
        }
    }

    async fn dispatcher(
        max_attempts: u32,
        transport: Arc<FlakyTransport>,
    ) -> (WebhookDispatcher, Arc<dyn CallStore>) {
        let store: Arc<dyn CallStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        (
            WebhookDispatcher::new(Arc::clone(&store), transport, config(max_attempts, None)),
            store,
        )
    }

    #[tokio::test]
    async fn delivers_on_first_attempt() {
        let transport = FlakyTransport::new(0);
        let (dispatcher, store) = dispatcher(3, Arc::clone(&transport)).await;

        let id = dispatcher
            .enqueue_to("call.completed", "http://x/hook", serde_json::json!({"call_id": "c1"}))
            .await
            .unwrap();

        let attempted = dispatcher.run_once(Utc::now()).await;
        assert_eq!(attempted, 1);

        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.status, WebhookStatus::Delivered);
        assert_eq!(transport.call_count(), 1);

        // Delivered tasks are never picked up again.
        dispatcher.run_once(Utc::now()).await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let transport = FlakyTransport::new(1);
        let (dispatcher, store) = dispatcher(3, Arc::clone(&transport)).await;

        let id = dispatcher
            .enqueue_to("recording.ready", "http://x/hook", serde_json::json!({}))
            .await
            .unwrap();

        let t0 = Utc::now();
        dispatcher.run_once(t0).await;
        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.status, WebhookStatus::Pending);
        assert_eq!(task.attempts, 1);
        // First retry is one base delay out.
        assert_eq!(task.next_attempt_at, t0 + chrono::Duration::seconds(30));

        // Not yet due.
        assert_eq!(dispatcher.run_once(t0).await, 0);

        // Due at the scheduled time — second attempt succeeds.
        dispatcher.run_once(task.next_attempt_at).await;
        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.status, WebhookStatus::Delivered);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn backoff_doubles_per_failure() {
        let transport = FlakyTransport::new(10);
        let (dispatcher, store) = dispatcher(5, Arc::clone(&transport)).await;

        let id = dispatcher
            .enqueue_to("call.completed", "http://x/hook", serde_json::json!({}))
            .await
            .unwrap();

        let t0 = Utc::now();
        dispatcher.run_once(t0).await;
        let after_first = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(
            after_first.next_attempt_at - t0,
            chrono::Duration::seconds(30)
        );

        let t1 = after_first.next_attempt_at;
        dispatcher.run_once(t1).await;
        let after_second = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(
            after_second.next_attempt_at - t1,
            chrono::Duration::seconds(60)
        );
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let transport = FlakyTransport::new(100);
        let (dispatcher, store) = dispatcher(3, Arc::clone(&transport)).await;

        let id = dispatcher
            .enqueue_to("call.completed", "http://x/hook", serde_json::json!({}))
            .await
            .unwrap();

        let mut now = Utc::now();
        for _ in 0..3 {
            dispatcher.run_once(now).await;
            now += chrono::Duration::hours(1);
        }

        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.status, WebhookStatus::Exhausted);
        assert_eq!(task.attempts, 3);
        assert_eq!(transport.call_count(), 3);

        // Never attempted again.
        dispatcher.run_once(now).await;
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn notify_without_url_is_noop() {
        let transport = FlakyTransport::new(0);
        let (dispatcher, store) = dispatcher(3, Arc::clone(&transport)).await;

        let id = dispatcher
            .notify("call.completed", serde_json::json!({"call_id": "c1"}))
            .await
            .unwrap();
        assert!(id.is_none());
        assert!(store.due_webhooks(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_with_url_enqueues() {
        let transport = FlakyTransport::new(0);
        let store: Arc<dyn CallStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let dispatcher = WebhookDispatcher::new(
            Arc::clone(&store),
            transport,
            config(3, Some("http://partner.test/hook")),
        );

        let id = dispatcher
            .notify("recording.ready", serde_json::json!({"call_id": "c1"}))
            .await
            .unwrap()
            .expect("task id");

        let task = store.get_webhook(id).await.unwrap().unwrap();
        assert_eq!(task.url, "http://partner.test/hook");
        assert_eq!(task.kind, "recording.ready");
    }
}
