//! Phase-state derivation for project onboarding progress.
//!
//! The onboarding pipeline runs through a fixed, totally ordered set of
//! phases. Everything here is a pure function over a per-phase status map:
//! no I/O, deterministic, and total. A phase missing from the map reads as
//! pending.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Snapshot;

/// One stage of the onboarding pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Crawl,
    Keywords,
    Content,
    Links,
    Export,
}

impl Phase {
    /// The fixed total ordering that defines "current phase".
    pub const ORDER: [Phase; 5] = [
        Phase::Crawl,
        Phase::Keywords,
        Phase::Content,
        Phase::Links,
        Phase::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Crawl => "crawl",
            Phase::Keywords => "keywords",
            Phase::Content => "content",
            Phase::Links => "links",
            Phase::Export => "export",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crawl" => Ok(Phase::Crawl),
            "keywords" => Ok(Phase::Keywords),
            "content" => Ok(Phase::Content),
            "links" => Ok(Phase::Links),
            "export" => Ok(Phase::Export),
            _ => anyhow::bail!(
                "Unknown phase '{}'. Valid phases: crawl, keywords, content, links, export",
                s
            ),
        }
    }
}

/// Per-phase execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

impl PhaseStatus {
    /// Completed and skipped phases both count toward completion and are
    /// passed over when deriving the current phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

/// Status record for one phase, owned by the project snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseStatusEntry {
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// Per-phase status mapping. Absent entries are treated as pending.
pub type PhaseMap = HashMap<Phase, PhaseStatusEntry>;

/// Aggregate completion as a rounded integer percentage (0..=100).
pub fn completion_percentage(map: &PhaseMap) -> u8 {
    let total = Phase::ORDER.len();
    let terminal = Phase::ORDER
        .into_iter()
        .filter(|phase| {
            map.get(phase)
                .map(|entry| entry.status.is_terminal())
                .unwrap_or(false)
        })
        .count();
    ((terminal as f64 / total as f64) * 100.0).round() as u8
}

/// First phase in pipeline order that is neither completed nor skipped.
/// `None` means every phase is terminal — the project is done.
pub fn current_phase(map: &PhaseMap) -> Option<Phase> {
    Phase::ORDER.into_iter().find(|phase| {
        !map.get(phase)
            .map(|entry| entry.status.is_terminal())
            .unwrap_or(false)
    })
}

/// Extract the phase map from a project snapshot's `phases` object.
/// Missing or malformed entries default to pending, so the derivation
/// functions stay total over whatever the cache currently holds.
pub fn phase_map_from_snapshot(snapshot: &Snapshot) -> PhaseMap {
    let mut map = PhaseMap::new();
    let Some(phases) = snapshot.get("phases").and_then(|v| v.as_object()) else {
        return map;
    };
    for phase in Phase::ORDER {
        if let Some(raw) = phases.get(phase.as_str()) {
            let entry = serde_json::from_value::<PhaseStatusEntry>(raw.clone())
                .unwrap_or_default();
            map.insert(phase, entry);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(status: PhaseStatus) -> PhaseStatusEntry {
        PhaseStatusEntry {
            status,
            ..Default::default()
        }
    }

    fn map_of(entries: &[(Phase, PhaseStatus)]) -> PhaseMap {
        entries.iter().map(|(p, s)| (*p, entry(*s))).collect()
    }

    // =========================================
    // completion_percentage
    // =========================================

    #[test]
    fn test_all_completed_is_100() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::Completed),
            (Phase::Content, PhaseStatus::Completed),
            (Phase::Links, PhaseStatus::Completed),
            (Phase::Export, PhaseStatus::Completed),
        ]);
        assert_eq!(completion_percentage(&map), 100);
    }

    #[test]
    fn test_empty_map_is_0() {
        assert_eq!(completion_percentage(&PhaseMap::new()), 0);
    }

    #[test]
    fn test_rounding_at_one_fifth_and_three_fifths() {
        let map = map_of(&[(Phase::Crawl, PhaseStatus::Completed)]);
        assert_eq!(completion_percentage(&map), 20);

        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::Skipped),
            (Phase::Content, PhaseStatus::Completed),
        ]);
        assert_eq!(completion_percentage(&map), 60);
    }

    #[test]
    fn test_skipped_counts_toward_completion() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Skipped),
            (Phase::Keywords, PhaseStatus::InProgress),
        ]);
        assert_eq!(completion_percentage(&map), 20);
    }

    #[test]
    fn test_blocked_and_in_progress_do_not_count() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Blocked),
            (Phase::Keywords, PhaseStatus::InProgress),
        ]);
        assert_eq!(completion_percentage(&map), 0);
    }

    // =========================================
    // current_phase
    // =========================================

    #[test]
    fn test_current_phase_is_first_non_terminal_in_order() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::InProgress),
            (Phase::Content, PhaseStatus::Pending),
        ]);
        assert_eq!(current_phase(&map), Some(Phase::Keywords));
    }

    #[test]
    fn test_current_phase_skips_over_skipped() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::Skipped),
        ]);
        assert_eq!(current_phase(&map), Some(Phase::Content));
    }

    #[test]
    fn test_current_phase_none_when_all_terminal() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::Skipped),
            (Phase::Content, PhaseStatus::Completed),
            (Phase::Links, PhaseStatus::Completed),
            (Phase::Export, PhaseStatus::Skipped),
        ]);
        assert_eq!(current_phase(&map), None);
    }

    #[test]
    fn test_missing_entries_read_as_pending() {
        assert_eq!(current_phase(&PhaseMap::new()), Some(Phase::Crawl));

        let map = map_of(&[(Phase::Crawl, PhaseStatus::Completed)]);
        assert_eq!(current_phase(&map), Some(Phase::Keywords));
    }

    #[test]
    fn test_blocked_phase_is_current() {
        let map = map_of(&[
            (Phase::Crawl, PhaseStatus::Completed),
            (Phase::Keywords, PhaseStatus::Blocked),
        ]);
        assert_eq!(current_phase(&map), Some(Phase::Keywords));
    }

    // =========================================
    // snapshot extraction
    // =========================================

    #[test]
    fn test_phase_map_from_snapshot_parses_entries() {
        let snapshot = json!({
            "id": 7,
            "phases": {
                "crawl": {"status": "completed", "completed_at": "2026-08-01T10:00:00Z"},
                "keywords": {"status": "in_progress", "started_at": "2026-08-01T10:05:00Z"},
                "content": {"status": "blocked", "blocked_reason": "missing brand guide"}
            }
        });

        let map = phase_map_from_snapshot(&snapshot);
        assert_eq!(map[&Phase::Crawl].status, PhaseStatus::Completed);
        assert!(map[&Phase::Crawl].completed_at.is_some());
        assert_eq!(map[&Phase::Keywords].status, PhaseStatus::InProgress);
        assert_eq!(
            map[&Phase::Content].blocked_reason.as_deref(),
            Some("missing brand guide")
        );
        assert!(!map.contains_key(&Phase::Links));
        assert_eq!(current_phase(&map), Some(Phase::Content));
    }

    #[test]
    fn test_phase_map_from_snapshot_without_phases_is_empty() {
        let map = phase_map_from_snapshot(&json!({"id": 7}));
        assert!(map.is_empty());
        assert_eq!(completion_percentage(&map), 0);
    }

    #[test]
    fn test_phase_map_from_snapshot_malformed_entry_defaults_to_pending() {
        let snapshot = json!({"phases": {"crawl": {"status": "exploded"}}});
        let map = phase_map_from_snapshot(&snapshot);
        assert_eq!(map[&Phase::Crawl].status, PhaseStatus::Pending);
    }

    #[test]
    fn test_phase_status_serde_names() {
        let json = serde_json::to_string(&PhaseStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: PhaseStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(parsed, PhaseStatus::Skipped);
    }

    #[test]
    fn test_phase_from_str_rejects_unknown() {
        assert!("launch".parse::<Phase>().is_err());
        assert_eq!("links".parse::<Phase>().unwrap(), Phase::Links);
    }
}
