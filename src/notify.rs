//! User-facing notification and diagnostic breadcrumb seams.
//!
//! The mutation engine and connection supervisor report through these traits
//! rather than owning any UI or error-reporting backend. The toast surface and
//! breadcrumb sink are external collaborators; the defaults here route both
//! through `tracing` so headless use still leaves a trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A diagnostic breadcrumb recorded at mutation and connection lifecycle points.
#[derive(Debug, Clone, Serialize)]
pub struct Breadcrumb {
    pub id: Uuid,
    /// Coarse grouping: `"mutation"` or `"connection"`.
    pub category: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Breadcrumb {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Toast-style notification surface for success/error messages.
pub trait Notifier: Send + Sync {
    fn success(&self, title: &str, detail: &str);
    fn error(&self, title: &str, detail: &str);
}

/// Sink for diagnostic breadcrumbs.
pub trait BreadcrumbSink: Send + Sync {
    fn record(&self, crumb: Breadcrumb);
}

/// Default notifier: routes toasts to the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, title: &str, detail: &str) {
        tracing::info!(title, detail, "toast");
    }

    fn error(&self, title: &str, detail: &str) {
        tracing::error!(title, detail, "toast");
    }
}

/// Default breadcrumb sink: emits debug-level log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBreadcrumbs;

impl BreadcrumbSink for TracingBreadcrumbs {
    fn record(&self, crumb: Breadcrumb) {
        tracing::debug!(
            category = %crumb.category,
            message = %crumb.message,
            crumb_id = %crumb.id,
            "breadcrumb"
        );
    }
}
