//! Emoji used in pipeline output, with plain-text fallbacks for terminals
//! that cannot render them.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "[-]");
