//! Shared UI icons.

use console::Emoji;

// Outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static BLOCKED: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// In progress
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "[FIX]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");

// Planning
pub static WAVE: Emoji<'_, '_> = Emoji("🌊 ", "[W]");
