//! Tracing-backed presenter and analytics sinks.

use serde_json::Value;
use tracing::info;

use super::{AnalyticsSink, NotificationPresenter};
use crate::events::{NotificationEvent, NotificationPriority};

/// Presents notifications as log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl NotificationPresenter for LogPresenter {
    fn show(&self, notification: &NotificationEvent) {
        match notification.priority {
            NotificationPriority::High | NotificationPriority::Urgent => tracing::warn!(
                title = %notification.title,
                category = notification.category.as_deref().unwrap_or("general"),
                "{}",
                notification.message
            ),
            _ => info!(
                title = %notification.title,
                category = notification.category.as_deref().unwrap_or("general"),
                "{}",
                notification.message
            ),
        }
    }
}

/// Emits analytics events at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn track(&self, name: &str, properties: Value) {
        tracing::debug!(event = name, %properties, "analytics");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track(&self, _name: &str, _properties: Value) {}
}
