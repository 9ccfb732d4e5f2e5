//! Push notification payloads.
//!
//! The host displays notifications; the worker only decides what to show and
//! where a click should lead.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Defaults for notifications raised by push messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    /// Body used when the push message carries no text.
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    /// Window opened when a notification is clicked.
    pub open_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Dashboard".to_string(),
            default_body: "New notification from the dashboard".to_string(),
            icon: "logo.png".to_string(),
            badge: "logo.png".to_string(),
            open_url: "/".to_string(),
        }
    }
}

/// A notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// ms since epoch
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// What the host should display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

pub const ACTION_EXPLORE: &str = "explore";
pub const ACTION_CLOSE: &str = "close";

impl NotificationRequest {
    /// Build the notification for a push message.
    pub fn from_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
        let body = payload
            .filter(|text| !text.is_empty())
            .unwrap_or(config.default_body.as_str())
            .to_string();

        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: config.icon.clone(),
        };

        Self {
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: vec![100, 50, 100],
            data: NotificationData {
                date_of_arrival: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default(),
                primary_key: 1,
            },
            actions: vec![action(ACTION_EXPLORE, "Open"), action(ACTION_CLOSE, "Close")],
        }
    }
}

/// Whether a click with `action` should open the application window.
pub fn click_opens_window(action: Option<&str>) -> bool {
    action != Some(ACTION_CLOSE)
}
