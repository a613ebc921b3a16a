//! Operator notifications.

use crate::client::DirectoryClient;
use crate::error::DirectoryResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notifications API.
pub struct NotificationsApi<'a> {
    client: &'a DirectoryClient,
}

impl<'a> NotificationsApi<'a> {
    pub(crate) fn new(client: &'a DirectoryClient) -> Self {
        Self { client }
    }

    /// List all notifications.
    pub async fn list(&self) -> DirectoryResult<Vec<Notification>> {
        let response: ListNotificationsResponse = self.client.http.get(&["notifications"]).await?;
        Ok(response.into_items())
    }

    /// Create a notification.
    pub async fn create(&self, notification: &NewNotification) -> DirectoryResult<Notification> {
        self.client.http.post(&["notifications"], notification).await
    }

    /// Update a notification, e.g. mark it read.
    pub async fn update(&self, id: &str, update: &NotificationUpdate) -> DirectoryResult<Notification> {
        self.client.http.put(&["notifications", id], update).await
    }

    /// Delete a notification.
    pub async fn delete(&self, id: &str) -> DirectoryResult<()> {
        self.client.http.delete_no_response(&["notifications", id]).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListNotificationsResponse {
    Bare(Vec<Notification>),
    Wrapped { notifications: Vec<Notification> },
}

impl ListNotificationsResponse {
    fn into_items(self) -> Vec<Notification> {
        match self {
            Self::Bare(items) | Self::Wrapped { notifications: items } => items,
        }
    }
}
