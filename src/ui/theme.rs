use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// What a piece of terminal output is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Header,
    Success,
    Error,
    Warn,
    Dim,
}

/// Terminal styling; every tone renders plain when colors are off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    colored: bool,
}

impl Theme {
    /// Colors only when stdout is a terminal and colors are not disabled
    pub fn detect() -> Self {
        Self {
            colored: console::Term::stdout().is_term() && console::colors_enabled(),
        }
    }

    pub fn colored() -> Self {
        Self { colored: true }
    }

    pub fn plain() -> Self {
        Self { colored: false }
    }

    pub fn style(&self, tone: Tone) -> Style {
        if !self.colored {
            return Style::new();
        }
        match tone {
            Tone::Header => Style::new().cyan().bold(),
            Tone::Success => Style::new().green().bold(),
            Tone::Error => Style::new().red().bold(),
            Tone::Warn => Style::new().yellow().bold(),
            Tone::Dim => Style::new().white().dimmed(),
        }
    }

    pub fn paint(&self, tone: Tone, text: &str) -> String {
        text.style(self.style(tone)).to_string()
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
