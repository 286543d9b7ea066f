//! Shared UI icons and emojis.
//!
//! Common emoji constants used across the UI components for consistent
//! visual styling, with plain-text fallbacks for dumb terminals.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Connection indicators
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "[WS]");
pub static POLL: Emoji<'_, '_> = Emoji("🔄 ", "[POLL]");

// Progress indicators
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static UPDATE: Emoji<'_, '_> = Emoji("📝 ", "[UPD]");
