//! Notification bridge: push display, click routing and the morning briefing.

mod platform;
mod types;

pub use platform::{ClientRegistry, NotificationOutbox, NotificationSink, WindowClients};
pub use types::{
    Notification, NotificationAction, NotificationData, NotificationOptions, PushPayload,
    WindowClient,
};

use crate::config::{NotificationConfig, NotificationSettings};
use crate::error::Result;
use crate::sync::PeriodicTag;
use chrono::{Local, Timelike, Utc};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Why a push event showed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyPayload,
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Shown(Notification),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// The dismiss action; nothing else happens.
    Dismissed,
    /// An existing window was focused and navigated.
    Focused { client_id: String, url: Url },
    Opened { client_id: String, url: Url },
}

/// Connects push and periodic events to the platform's notification and
/// window APIs.
pub struct NotificationBridge {
    settings: NotificationSettings,
    origin: Url,
    sink: Arc<dyn NotificationSink>,
    clients: Arc<dyn WindowClients>,
}

impl NotificationBridge {
    pub fn new(
        settings: NotificationSettings,
        origin: Url,
        sink: Arc<dyn NotificationSink>,
        clients: Arc<dyn WindowClients>,
    ) -> Self {
        Self {
            settings,
            origin,
            sink,
            clients,
        }
    }

    /// Build the display options for a push payload, filling fallbacks.
    pub fn push_options(&self, payload: &PushPayload) -> (String, NotificationOptions) {
        let s = &self.settings;
        let title = payload.title.clone().unwrap_or_else(|| s.default_title.clone());
        let options = NotificationOptions {
            body: payload.body.clone().unwrap_or_else(|| s.default_body.clone()),
            icon: s.icon.clone(),
            badge: s.badge.clone(),
            vibrate: s.vibrate.clone(),
            data: NotificationData {
                url: payload.url.clone().unwrap_or_else(|| s.default_url.clone()),
                timestamp: Some(Utc::now().timestamp_millis()),
            },
            actions: vec![
                NotificationAction::new(NotificationConfig::OPEN_ACTION, "Open"),
                NotificationAction::new(NotificationConfig::DISMISS_ACTION, "Dismiss"),
            ],
            tag: payload.tag.clone().unwrap_or_else(|| s.default_tag.clone()),
            renotify: true,
        };
        (title, options)
    }

    /// Handle a push event. Missing or unparsable data shows nothing.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<PushOutcome> {
        let data = match data {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(PushOutcome::Skipped(SkipReason::EmptyPayload)),
        };
        let payload = match PushPayload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Ignoring push with unparsable payload: {}", e);
                return Ok(PushOutcome::Skipped(SkipReason::InvalidPayload));
            }
        };

        let (title, options) = self.push_options(&payload);
        let notification = self.sink.show(&title, options).await?;
        Ok(PushOutcome::Shown(notification))
    }

    /// Handle a click on `notification`, optionally on one of its actions.
    pub async fn on_notification_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
    ) -> Result<ClickOutcome> {
        self.sink.close(notification.id).await?;

        if action == Some(NotificationConfig::DISMISS_ACTION) {
            return Ok(ClickOutcome::Dismissed);
        }

        let target = self.resolve_target(notification.target_url());
        let clients = self.clients.match_all().await?;
        let app_origin = self.origin.origin();

        if let Some(client) = clients.into_iter().find(|c| c.url.origin() == app_origin) {
            self.clients.focus(&client.id).await?;
            self.clients.navigate(&client.id, &target).await?;
            return Ok(ClickOutcome::Focused {
                client_id: client.id,
                url: target,
            });
        }

        let client = self.clients.open_window(&target).await?;
        Ok(ClickOutcome::Opened {
            client_id: client.id,
            url: target,
        })
    }

    /// Handle a periodic sync event at the current local time.
    pub async fn on_periodic_sync(&self, tag: &str) -> Result<Option<Notification>> {
        self.on_periodic_sync_at(tag, Local::now()).await
    }

    /// Handle a periodic sync event as if it fired at `now`.
    pub async fn on_periodic_sync_at<T: Timelike + Send>(
        &self,
        tag: &str,
        now: T,
    ) -> Result<Option<Notification>> {
        match PeriodicTag::parse(tag) {
            Some(PeriodicTag::MorningBriefing) => self.morning_briefing(now.hour()).await,
            None => {
                debug!("Ignoring unknown periodic sync tag {}", tag);
                Ok(None)
            }
        }
    }

    pub fn in_morning_window(&self, hour: u32) -> bool {
        (self.settings.morning_start_hour..=self.settings.morning_end_hour).contains(&hour)
    }

    async fn morning_briefing(&self, hour: u32) -> Result<Option<Notification>> {
        if !self.in_morning_window(hour) {
            debug!("Skipping morning briefing at hour {}", hour);
            return Ok(None);
        }
        let options = NotificationOptions {
            body: NotificationConfig::MORNING_BODY.to_string(),
            icon: self.settings.icon.clone(),
            badge: self.settings.badge.clone(),
            vibrate: Vec::new(),
            data: NotificationData {
                url: NotificationConfig::MORNING_URL.to_string(),
                timestamp: None,
            },
            actions: Vec::new(),
            tag: PeriodicTag::MORNING_BRIEFING.to_string(),
            renotify: false,
        };
        let notification = self
            .sink
            .show(NotificationConfig::MORNING_TITLE, options)
            .await?;
        Ok(Some(notification))
    }

    fn resolve_target(&self, url: &str) -> Url {
        let url = if url.is_empty() {
            self.settings.default_url.as_str()
        } else {
            url
        };
        self.origin.join(url).unwrap_or_else(|_| self.origin.clone())
    }
}
