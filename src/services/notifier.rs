//! Master-contact notification fan-out.
//!
//! ## Priority formatting
//! | Type              | Prefix |
//! |-------------------|--------|
//! | `critical_error`  | 🚨     |
//! | `budget_exceeded` | 🚨     |
//! | `approval_needed` | ⚠️     |
//! | `budget_warning`  | ⚠️     |
//! | everything else   | (none) |
//!
//! Delivery is recorded on the notification row (attempts, sent/delivered
//! timestamps); failures are recorded and never propagate to the caller's
//! main path.

use std::sync::Arc;

use tracing::warn;

use crate::channels::ChannelManager;
use crate::event_bus::{AppEvent, EventBus};
use crate::store::notifications::{DeliveryStatus, MasterNotification, NotificationType};
use crate::store::{Store, new_id, now_rfc3339};

pub struct MasterNotificationService {
    store: Store,
    channels: Arc<ChannelManager>,
    bus: Option<Arc<dyn EventBus>>,
}

impl MasterNotificationService {
    pub fn new(
        store: Store,
        channels: Arc<ChannelManager>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Self {
        Self { store, channels, bus }
    }

    /// Create, persist, and deliver a typed notification.  Returns the stored
    /// row's ID; delivery failures are recorded on the row, not returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify(
        &self,
        user_id: &str,
        agent_id: &str,
        notification_type: NotificationType,
        title: &str,
        content: &str,
        channel: &str,
        recipient: Option<&str>,
        reference: Option<(&str, &str)>,
    ) -> Result<String, String> {
        let notification = MasterNotification {
            id: new_id(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            notification_type,
            title: title.to_string(),
            content: content.to_string(),
            context: serde_json::json!({
                "priority": priority_of(notification_type),
            }),
            channel: channel.to_string(),
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            reference_type: reference.map(|(t, _)| t.to_string()),
            reference_id: reference.map(|(_, id)| id.to_string()),
            created_at: now_rfc3339(),
        };
        self.store
            .insert_master_notification(&notification)
            .map_err(|e| e.to_string())?;

        let body = format_body(notification_type, title, content);
        let delivered = match self.channels.get(channel) {
            Some(transport) => match transport.send(&body, recipient).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("notification {} delivery failed on {channel}: {e}", notification.id);
                    false
                }
            },
            None => {
                warn!("notification {} has no channel {channel}", notification.id);
                false
            }
        };

        let status = if delivered { DeliveryStatus::Delivered } else { DeliveryStatus::Failed };
        if let Err(e) = self.store.mark_notification_delivery(&notification.id, status) {
            warn!("notification {} status write failed: {e}", notification.id);
        }
        if let Some(bus) = &self.bus {
            let _ = bus.publish(AppEvent::NotificationDispatched {
                notification_id: notification.id.clone(),
                channel: channel.to_string(),
                delivered,
            });
        }
        Ok(notification.id)
    }
}

fn priority_of(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::CriticalError | NotificationType::BudgetExceeded => "urgent",
        NotificationType::ApprovalNeeded | NotificationType::BudgetWarning => "high",
        _ => "normal",
    }
}

fn format_body(notification_type: NotificationType, title: &str, content: &str) -> String {
    let prefix = match notification_type {
        NotificationType::CriticalError | NotificationType::BudgetExceeded => "🚨 ",
        NotificationType::ApprovalNeeded | NotificationType::BudgetWarning => "⚠️ ",
        _ => "",
    };
    format!("{prefix}{title}\n\n{content}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::manager::test_support::RecordingChannel;

    fn service_with(channel: Arc<RecordingChannel>) -> (MasterNotificationService, Store) {
        let store = Store::in_memory().unwrap();
        let mut manager = ChannelManager::new();
        manager.register(channel);
        (
            MasterNotificationService::new(store.clone(), Arc::new(manager), None),
            store,
        )
    }

    #[tokio::test]
    async fn delivers_and_tracks_status() {
        let channel = Arc::new(RecordingChannel::new("email"));
        let (service, store) = service_with(channel.clone());

        let id = service
            .notify(
                "u1",
                "a1",
                NotificationType::ApprovalNeeded,
                "Approval needed",
                "sendEmail to john@x.com",
                "email",
                Some("boss@example.com"),
                Some(("approval", "ap-1")),
            )
            .await
            .unwrap();

        assert_eq!(channel.count(), 1);
        let row = store.get_master_notification(&id).unwrap();
        assert_eq!(row.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(row.delivery_attempts, 1);
        assert_eq!(row.reference_id.as_deref(), Some("ap-1"));

        let deliveries = channel.deliveries.lock().unwrap();
        assert!(deliveries[0].1.starts_with("⚠️ Approval needed"));
    }

    #[tokio::test]
    async fn failed_delivery_is_recorded_not_raised() {
        let channel = Arc::new(RecordingChannel::failing("email"));
        let (service, store) = service_with(channel);

        let id = service
            .notify(
                "u1",
                "a1",
                NotificationType::BudgetExceeded,
                "Budget exceeded",
                "daily budget is exhausted",
                "email",
                None,
                None,
            )
            .await
            .unwrap();

        let row = store.get_master_notification(&id).unwrap();
        assert_eq!(row.delivery_status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_channel_marks_failed() {
        let channel = Arc::new(RecordingChannel::new("email"));
        let (service, store) = service_with(channel);

        let id = service
            .notify(
                "u1",
                "a1",
                NotificationType::Test,
                "t",
                "c",
                "pager",
                None,
                None,
            )
            .await
            .unwrap();
        let row = store.get_master_notification(&id).unwrap();
        assert_eq!(row.delivery_status, DeliveryStatus::Failed);
    }
}
