//! Background task queue
//!
//! Request handlers enqueue work here and return immediately. A single
//! worker drains the channel and spawns each task; tasks are not retried
//! and may complete in any order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::AppState;
use crate::data::{Database, Privacy, User};
use crate::error::AppError;
use crate::federation::{ActivityDelivery, Software, activity_type, follower_inbox_targets};
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_SENT, TASKS_ENQUEUED_TOTAL, TASKS_PROCESSED_TOTAL};
use crate::service::{AccountService, ImportService};

/// A unit of background work
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Send an activity to everyone who should receive it
    ///
    /// `software` restricts follower delivery to peers that do (`Quire`) or
    /// don't (`Other`) run Quire; `None` sends to all.
    Broadcast {
        sender_id: String,
        activity: Value,
        software: Option<Software>,
        privacy: Privacy,
        mention_ids: Vec<String>,
    },
    /// Send an activity to a single inbox
    Deliver {
        sender_id: String,
        inbox: String,
        activity: Value,
    },
    ImportItem {
        item_id: String,
    },
    /// Look up which software a remote user's server runs
    SetRemoteServer {
        user_id: String,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Broadcast { .. } => "broadcast",
            Self::Deliver { .. } => "deliver",
            Self::ImportItem { .. } => "import_item",
            Self::SetRemoteServer { .. } => "set_remote_server",
        }
    }
}

/// Where services send background work
#[cfg_attr(test, mockall::automock)]
pub trait TaskSink: Send + Sync {
    fn enqueue(&self, task: Task);
}

/// In-process queue backed by an unbounded channel
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Create the queue and the receiver to hand to [`spawn_worker`]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskSink for TaskQueue {
    fn enqueue(&self, task: Task) {
        let name = task.name();
        TASKS_ENQUEUED_TOTAL.with_label_values(&[name]).inc();
        if self.sender.send(task).is_err() {
            tracing::error!(task = name, "Task worker has stopped; dropping task");
        }
    }
}

/// Drain the queue until every sender is gone
pub fn spawn_worker(
    state: AppState,
    mut receiver: mpsc::UnboundedReceiver<Task>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = receiver.recv().await {
            let state = state.clone();
            tokio::spawn(async move {
                let name = task.name();
                let outcome = match run_task(&state, task).await {
                    Ok(()) => "success",
                    Err(error) => {
                        tracing::warn!(task = name, %error, "Task failed");
                        "error"
                    }
                };
                TASKS_PROCESSED_TOTAL
                    .with_label_values(&[name, outcome])
                    .inc();
            });
        }
        tracing::info!("Task worker stopped");
    })
}

async fn run_task(state: &AppState, task: Task) -> Result<(), AppError> {
    match task {
        Task::Broadcast {
            sender_id,
            activity,
            software,
            privacy,
            mention_ids,
        } => {
            let sender = state.db.get_user(&sender_id).await?.ok_or(AppError::NotFound)?;
            let inboxes =
                broadcast_recipients(&state.db, &sender, privacy, &mention_ids, software).await?;
            if inboxes.is_empty() {
                tracing::debug!(
                    sender = %sender.username,
                    activity_type = activity_type(&activity),
                    "No remote recipients"
                );
                return Ok(());
            }

            let software_label = software.map(|s| s.as_str()).unwrap_or("all");
            ACTIVITYPUB_ACTIVITIES_SENT
                .with_label_values(&[activity_type(&activity), software_label])
                .inc();

            let delivery = delivery_for(state, &sender).await?;
            delivery.deliver_to_inboxes(activity, inboxes).await;
            Ok(())
        }
        Task::Deliver {
            sender_id,
            inbox,
            activity,
        } => {
            let sender = state.db.get_user(&sender_id).await?.ok_or(AppError::NotFound)?;
            ACTIVITYPUB_ACTIVITIES_SENT
                .with_label_values(&[activity_type(&activity), "all"])
                .inc();
            let delivery = delivery_for(state, &sender).await?;
            delivery.deliver_to_inbox(&inbox, &activity).await
        }
        Task::ImportItem { item_id } => {
            ImportService::from_state(state)
                .process_item(&item_id)
                .await
        }
        Task::SetRemoteServer { user_id } => {
            AccountService::from_state(state)
                .set_remote_server(&user_id)
                .await
        }
    }
}

async fn delivery_for(state: &AppState, sender: &User) -> Result<ActivityDelivery, AppError> {
    let signer = AccountService::from_state(state).signing_actor(sender).await?;
    let federation = &state.config.federation;
    Ok(ActivityDelivery::new(
        state.http_client.clone(),
        signer,
        federation.delivery_concurrency,
        Duration::from_secs(federation.delivery_timeout_secs),
        federation.allow_private_hosts,
    ))
}

/// Remote inboxes an activity from `sender` should reach
///
/// Mentioned remote users are always included. Unless the privacy is
/// direct, the sender's remote followers are added, one shared inbox per
/// server where known. `software` filters both groups by whether the
/// recipient runs Quire.
pub async fn broadcast_recipients(
    db: &Database,
    sender: &User,
    privacy: Privacy,
    mention_ids: &[String],
    software: Option<Software>,
) -> Result<Vec<String>, AppError> {
    let native_filter = software.map(|s| s == Software::Quire);
    let mut inboxes: Vec<String> = db
        .get_users_by_ids(mention_ids)
        .await?
        .into_iter()
        .filter(|user| !user.local)
        .filter(|user| native_filter.is_none_or(|native| user.native_peer == native))
        .map(|user| user.inbox)
        .collect();

    if privacy != Privacy::Direct {
        let followers = db
            .get_remote_follower_inboxes(&sender.id, native_filter)
            .await?;
        inboxes.extend(follower_inbox_targets(followers));
    }

    Ok(crate::federation::unique_inbox_targets(inboxes))
}

/// Shared handle type stored on `AppState`
pub type SharedTaskSink = Arc<dyn TaskSink>;
