//! Platform seams for notifications and windows, with in-memory
//! implementations.

use super::types::{Notification, NotificationOptions, WindowClient};
use crate::error::{HustlyError, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;
use uuid::Uuid;

/// Displays notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, title: &str, options: NotificationOptions) -> Result<Notification>;

    /// Close a notification. Returns whether it was still showing.
    async fn close(&self, id: Uuid) -> Result<bool>;
}

/// The app's open windows.
#[async_trait]
pub trait WindowClients: Send + Sync {
    /// Every window client, controlled or not.
    async fn match_all(&self) -> Result<Vec<WindowClient>>;

    async fn focus(&self, id: &str) -> Result<()>;

    async fn navigate(&self, id: &str, url: &Url) -> Result<()>;

    async fn open_window(&self, url: &Url) -> Result<WindowClient>;
}

/// Notifications shown so far, newest last.
///
/// Showing a notification whose tag is already on display replaces it.
#[derive(Default)]
pub struct NotificationOutbox {
    shown: RwLock<Vec<Notification>>,
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Notification> {
        self.shown.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Notification> {
        self.shown.read().await.iter().find(|n| n.id == id).cloned()
    }
}

#[async_trait]
impl NotificationSink for NotificationOutbox {
    async fn show(&self, title: &str, options: NotificationOptions) -> Result<Notification> {
        let notification = Notification::new(title, options);
        let mut shown = self.shown.write().await;
        shown.retain(|n| n.options.tag != notification.options.tag);
        shown.push(notification.clone());
        info!(
            "Showing notification '{}' (tag {})",
            notification.title, notification.options.tag
        );
        Ok(notification)
    }

    async fn close(&self, id: Uuid) -> Result<bool> {
        let mut shown = self.shown.write().await;
        let before = shown.len();
        shown.retain(|n| n.id != id);
        Ok(shown.len() != before)
    }
}

/// Window clients tracked in memory.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<Vec<WindowClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a window that is already open at `url`.
    pub async fn register(&self, url: Url) -> WindowClient {
        let client = WindowClient {
            id: Uuid::new_v4().to_string(),
            url,
            focused: false,
        };
        self.clients.write().await.push(client.clone());
        client
    }

    pub async fn get(&self, id: &str) -> Option<WindowClient> {
        self.clients.read().await.iter().find(|c| c.id == id).cloned()
    }
}

#[async_trait]
impl WindowClients for ClientRegistry {
    async fn match_all(&self) -> Result<Vec<WindowClient>> {
        Ok(self.clients.read().await.clone())
    }

    async fn focus(&self, id: &str) -> Result<()> {
        let mut clients = self.clients.write().await;
        if !clients.iter().any(|c| c.id == id) {
            return Err(HustlyError::ClientNotFound(id.to_string()));
        }
        for client in clients.iter_mut() {
            client.focused = client.id == id;
        }
        Ok(())
    }

    async fn navigate(&self, id: &str, url: &Url) -> Result<()> {
        let mut clients = self.clients.write().await;
        let client = clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| HustlyError::ClientNotFound(id.to_string()))?;
        client.url = url.clone();
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<WindowClient> {
        let mut clients = self.clients.write().await;
        for client in clients.iter_mut() {
            client.focused = false;
        }
        let client = WindowClient {
            id: Uuid::new_v4().to_string(),
            url: url.clone(),
            focused: true,
        };
        clients.push(client.clone());
        info!("Opened window at {}", url);
        Ok(client)
    }
}
