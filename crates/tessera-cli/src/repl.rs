//! Rustyline-based console editor with history and command completion.

use std::path::PathBuf;

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::history::DefaultHistory;
use rustyline::{
    CompletionType, Config, Context, EditMode, Editor, Helper, Highlighter, Validator,
};

use crate::commands::console::COMMAND_NAMES;

/// History file, kept in the working directory.
const HISTORY_FILE: &str = ".tessera_history";

/// Events returned by the console editor.
pub(crate) enum ReadlineEvent {
    /// A line of input.
    Line(String),
    /// Ctrl+C, cancelling current input.
    Interrupted,
    /// Ctrl+D, signalling end-of-input.
    Eof,
}

/// Completes the first word of a line against the console commands.
#[derive(Helper, Validator, Highlighter)]
struct ConsoleHelper {
    hinter: HistoryHinter,
}

impl Completer for ConsoleHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix = line.get(..pos).unwrap_or(line);
        if prefix.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }

        let matches = COMMAND_NAMES
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| Pair {
                display: (*cmd).to_string(),
                replacement: (*cmd).to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ConsoleHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &Context<'_>) -> Option<String> {
        self.hinter.hint(line, pos, ctx)
    }
}

/// Console line editor.
pub(crate) struct ReplEditor {
    editor: Editor<ConsoleHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl ReplEditor {
    /// Create an editor, loading history from the working directory if any.
    pub(crate) fn new() -> anyhow::Result<Self> {
        let history_path = PathBuf::from(HISTORY_FILE);

        let config = Config::builder()
            .history_ignore_dups(true)?
            .completion_type(CompletionType::List)
            .edit_mode(EditMode::Emacs)
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(ConsoleHelper {
            hinter: HistoryHinter::new(),
        }));
        if history_path.exists() {
            let _ = editor.load_history(&history_path);
        }

        Ok(Self {
            editor,
            history_path,
        })
    }

    /// Read one line.
    pub(crate) fn readline(&mut self) -> ReadlineEvent {
        match self.editor.readline("tessera> ") {
            Ok(line) => {
                let _ = self.editor.save_history(&self.history_path);
                ReadlineEvent::Line(line)
            },
            Err(ReadlineError::Interrupted) => ReadlineEvent::Interrupted,
            Err(ReadlineError::Eof | _) => ReadlineEvent::Eof,
        }
    }
}
