//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[FALLBACK]");
pub static RESUME: Emoji<'_, '_> = Emoji("⏩ ", "[RESUME]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
