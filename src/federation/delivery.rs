//! Activity delivery
//!
//! Signs and POSTs activities to remote inboxes. Delivery is best effort:
//! failures are logged and counted, never retried.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;

use super::activities::activity_type;
use super::fetch::{ACTIVITY_JSON, guard_url};
use super::signature::{SigningActor, sign_request};
use crate::error::AppError;
use crate::metrics::{FEDERATION_REQUESTS_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS};

/// Outcome of one inbox delivery
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub inbox_uri: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Delivers activities on behalf of one local user
#[derive(Clone)]
pub struct ActivityDelivery {
    http_client: Arc<reqwest::Client>,
    signer: Arc<SigningActor>,
    max_concurrent: usize,
    timeout: Duration,
    allow_private: bool,
}

impl ActivityDelivery {
    pub fn new(
        http_client: Arc<reqwest::Client>,
        signer: SigningActor,
        max_concurrent: usize,
        timeout: Duration,
        allow_private: bool,
    ) -> Self {
        Self {
            http_client,
            signer: Arc::new(signer),
            max_concurrent: max_concurrent.max(1),
            timeout,
            allow_private,
        }
    }

    /// Deliver an activity to a single inbox
    ///
    /// # Errors
    /// Returns error if the inbox is not allowed, signing fails, the request
    /// fails or the inbox answers with a non-success status.
    pub async fn deliver_to_inbox(&self, inbox_uri: &str, activity: &Value) -> Result<(), AppError> {
        guard_url(inbox_uri, self.allow_private).await?;

        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("activity serialization: {e}")))?;
        let sig_headers = sign_request("POST", inbox_uri, Some(&body), &self.signer)?;

        let mut request = self
            .http_client
            .post(inbox_uri)
            .timeout(self.timeout)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let start = Instant::now();
        let result = request.body(body).send().await;
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .observe(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            AppError::Federation(format!("Failed to deliver to {}: {}", inbox_uri, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox_uri,
                response.status()
            )));
        }

        tracing::debug!(
            inbox = %inbox_uri,
            activity_type = activity_type(activity),
            "Delivered activity"
        );
        Ok(())
    }

    /// Deliver an activity to many inboxes with bounded concurrency
    pub async fn deliver_to_inboxes(
        &self,
        activity: Value,
        inbox_uris: Vec<String>,
    ) -> Vec<DeliveryResult> {
        let total_targets = inbox_uris.len();
        let delivery_targets = unique_inbox_targets(inbox_uris);

        tracing::info!(
            actor = %self.signer.actor_uri,
            activity_type = activity_type(&activity),
            targets = delivery_targets.len(),
            requested = total_targets,
            "Delivering activity"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let activity = Arc::new(activity);
        let mut tasks = Vec::with_capacity(delivery_targets.len());

        for inbox_uri in delivery_targets {
            let semaphore = semaphore.clone();
            let activity = activity.clone();
            let delivery = self.clone();

            tasks.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => delivery.deliver_to_inbox(&inbox_uri, &activity).await,
                    Err(_) => Err(AppError::Internal(anyhow::anyhow!(
                        "delivery semaphore closed"
                    ))),
                };

                FEDERATION_REQUESTS_TOTAL
                    .with_label_values(&[
                        "outbound",
                        if result.is_ok() { "success" } else { "error" },
                    ])
                    .inc();

                if let Err(ref error) = result {
                    tracing::warn!(inbox = %inbox_uri, %error, "Delivery failed");
                }

                DeliveryResult {
                    inbox_uri,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(result) => results.push(result),
                Err(error) => tracing::error!(%error, "Delivery task panicked"),
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        tracing::info!(
            succeeded = success_count,
            failed = results.len() - success_count,
            "Batch delivery complete"
        );

        results
    }
}

/// Drop repeated inbox URIs, keeping first-seen order
pub fn unique_inbox_targets(inbox_uris: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    inbox_uris
        .into_iter()
        .filter(|uri| seen.insert(uri.clone()))
        .collect()
}

/// Pick one inbox per follower: the shared inbox when known
pub fn follower_inbox_targets(rows: Vec<(String, Option<String>)>) -> Vec<String> {
    unique_inbox_targets(
        rows.into_iter()
            .map(|(inbox, shared)| shared.filter(|s| !s.is_empty()).unwrap_or(inbox))
            .collect(),
    )
}
