use crate::progress::{Phase, PhaseMap, completion_percentage, current_phase};
use crate::realtime::ConnectionState;
use crate::ui::icons::{BLOCKER, CHECK, LINK, POLL, PROGRESS, UPDATE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for `pulse watch`, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Progress bar — overall completion percentage across all phases
/// - Status line — spinner with the current phase and connection state
///
/// Push events are appended above the bars via `MultiProgress::println`.
pub struct WatchUI {
    multi: MultiProgress,
    progress_bar: ProgressBar,
    status_bar: ProgressBar,
}

impl WatchUI {
    pub fn new(project_id: i64) -> Self {
        let multi = MultiProgress::new();

        let progress_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let progress_bar = multi.add(ProgressBar::new(100));
        progress_bar.set_style(progress_style);
        progress_bar.set_prefix(format!("Project {project_id}"));

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("  Status");
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            progress_bar,
            status_bar,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Redraw the progress bar and current-phase message from a phase map.
    pub fn render_phases(&self, phases: &PhaseMap) {
        let pct = completion_percentage(phases);
        self.progress_bar.set_position(u64::from(pct));
        match current_phase(phases) {
            Some(phase) => {
                self.progress_bar
                    .set_message(format!("current: {}", style(phase).yellow()));
            }
            None => {
                self.progress_bar
                    .set_message(format!("{}{}", CHECK, style("all phases complete").green()));
            }
        }
    }

    /// Update the status line with the live connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        let label = match state {
            ConnectionState::Connected => {
                format!("{}{}", LINK, style("live").green())
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                format!("{}", style(state).yellow())
            }
            ConnectionState::FallbackPolling => {
                format!("{}{}", POLL, style("polling (realtime unavailable)").yellow())
            }
            ConnectionState::Disconnected => format!("{}", style(state).red()),
        };
        self.status_bar.set_message(label);
    }

    /// Append a line for an entity-update push.
    pub fn log_update(&self, entity: Option<&str>, entity_id: Option<i64>) {
        self.print_line(format!(
            "{}{}",
            UPDATE,
            style(update_line(entity, entity_id)).dim()
        ));
    }

    /// Append a line for a phase-progress push.
    pub fn log_progress(&self, phase: Phase, percent: Option<u8>, message: Option<&str>) {
        let mut line = format!("{}{}", PROGRESS, style(phase).cyan());
        if let Some(pct) = percent {
            line.push_str(&format!(" {pct}%"));
        }
        if let Some(msg) = message {
            line.push_str(&format!(" {}", style(msg).dim()));
        }
        self.print_line(line);
    }

    /// Append a warning line (fetch failures, blocked phases).
    pub fn log_warning(&self, msg: &str) {
        self.print_line(format!("{}{}", BLOCKER, style(msg).yellow()));
    }

    /// Clear the bars before exiting so the terminal is left clean.
    pub fn finish(&self) {
        self.status_bar.finish_and_clear();
        self.progress_bar.finish_and_clear();
    }
}

fn update_line(entity: Option<&str>, entity_id: Option<i64>) -> String {
    match (entity, entity_id) {
        (Some(entity), Some(id)) => format!("{entity} #{id} changed"),
        (Some(entity), None) => format!("{entity} changed"),
        _ => "project changed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_line_names_the_entity() {
        assert_eq!(update_line(Some("content"), Some(3)), "content #3 changed");
        assert_eq!(update_line(Some("keyword"), None), "keyword changed");
        assert_eq!(update_line(None, None), "project changed");
    }

    #[test]
    fn test_update_icon_is_not_a_phase_status_glyph() {
        use crate::ui::icons::{SKIP, UPDATE};
        assert_ne!(format!("{UPDATE}"), format!("{SKIP}"));
    }
}
