use std::sync::OnceLock;

use clap::ValueEnum;
use serde::Serialize;

static QUIET: OnceLock<bool> = OnceLock::new();

/// Suppress decorative output when `EVERYPOLL_QUIET` is set
pub fn is_quiet() -> bool {
    *QUIET.get_or_init(|| {
        std::env::var("EVERYPOLL_QUIET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a value as pretty JSON on stdout
pub fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
