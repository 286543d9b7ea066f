//! Entity keys addressing cache slots.
//!
//! An [`EntityKey`] is an ordered tuple of scalars (kind, numeric id, and an
//! optional sub-id) identifying one logical server entity. Keys are stable,
//! hashable, and comparable: two reads with the same key always observe the
//! same cache slot.

use serde::{Deserialize, Serialize};

/// The kinds of server entities the sync core caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Content,
    CrawlJob,
    Keyword,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Project => write!(f, "project"),
            EntityKind::Content => write!(f, "content"),
            EntityKind::CrawlJob => write!(f, "crawl_job"),
            EntityKind::Keyword => write!(f, "keyword"),
        }
    }
}

/// Stable identifier for one cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
    /// Sub-resource discriminator (e.g. a content section within a project).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self {
            kind,
            id,
            sub: None,
        }
    }

    pub fn with_sub(kind: EntityKind, id: i64, sub: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            sub: Some(sub.into()),
        }
    }

    pub fn project(id: i64) -> Self {
        Self::new(EntityKind::Project, id)
    }

    pub fn content(id: i64) -> Self {
        Self::new(EntityKind::Content, id)
    }

    pub fn crawl_job(id: i64) -> Self {
        Self::new(EntityKind::CrawlJob, id)
    }

    pub fn keyword(id: i64) -> Self {
        Self::new(EntityKind::Keyword, id)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}/{}/{}", self.kind, self.id, sub),
            None => write!(f, "{}/{}", self.kind, self.id),
        }
    }
}
