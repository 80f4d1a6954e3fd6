//! Console styling.

use colored::{ColoredString, Colorize};
use tessera_runtime::{ComponentState, ComponentSummary};

/// Severity of a one-line status message.
#[derive(Debug, Clone, Copy)]
enum Tone {
    Done,
    Failed,
    Caution,
    Note,
}

impl Tone {
    fn mark(self) -> ColoredString {
        match self {
            Self::Done => "✓".green(),
            Self::Failed => "✗".red(),
            Self::Caution => "!".yellow(),
            Self::Note => "i".blue(),
        }
    }

    fn paint(self, text: &str) -> ColoredString {
        match self {
            Self::Failed => text.red(),
            Self::Caution => text.yellow(),
            Self::Done | Self::Note => text.normal(),
        }
    }

    fn line(self, text: &str) -> String {
        format!("{} {}", self.mark(), self.paint(text))
    }
}

/// Text styles shared by every command.
pub(crate) struct Theme;

impl Theme {
    pub(crate) fn header(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    pub(crate) fn success(text: &str) -> String {
        Tone::Done.line(text)
    }

    pub(crate) fn error(text: &str) -> String {
        Tone::Failed.line(text)
    }

    pub(crate) fn warning(text: &str) -> String {
        Tone::Caution.line(text)
    }

    pub(crate) fn info(text: &str) -> String {
        Tone::Note.line(text)
    }

    pub(crate) fn dimmed(text: &str) -> String {
        text.dimmed().to_string()
    }

    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Listing line in the `ID: n, Name: x, State: s` shape, state colored.
    pub(crate) fn component(summary: &ComponentSummary) -> String {
        let label = summary.state.to_string();
        let state = match summary.state {
            ComponentState::Loaded => label.normal(),
            ComponentState::Deployed => label.cyan(),
            ComponentState::Started => label.green(),
            ComponentState::Stopped => label.yellow(),
            ComponentState::Deleted => label.dimmed(),
        };
        format!(
            "ID: {}, Name: {}, State: {state}",
            summary.id.to_string().bold(),
            summary.name,
        )
    }
}

/// Print the component listing, or a note when there is nothing to list.
pub(crate) fn print_components(summaries: &[ComponentSummary]) {
    if summaries.is_empty() {
        println!("{}", Theme::warning("no components registered"));
        return;
    }
    for summary in summaries {
        println!("  {}", Theme::component(summary));
    }
}
