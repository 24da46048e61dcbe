//! Line input on a dedicated thread.
//!
//! `rustyline` blocks the calling thread, so the editor lives on its own
//! thread and hands lines to the async session loop over a channel.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D or the terminal went away.
    Eof,
}

impl InputEvent {
    const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Line(_))
    }
}

/// Spawn the reader thread. The thread exits after sending a terminal event
/// or when the receiver is dropped.
pub fn spawn_line_reader(prompt: &'static str) -> std::io::Result<mpsc::Receiver<InputEvent>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("fitcoach-input".to_string())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to open line editor");
                    let _ = tx.blocking_send(InputEvent::Eof);
                    return;
                }
            };

            loop {
                let event = match editor.readline(prompt) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        InputEvent::Line(line)
                    }
                    Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
                    Err(ReadlineError::Eof) => InputEvent::Eof,
                    Err(err) => {
                        tracing::warn!(error = %err, "Line editor failed");
                        InputEvent::Eof
                    }
                };
                let terminal = event.is_terminal();
                if tx.blocking_send(event).is_err() || terminal {
                    break;
                }
            }
        })?;
    Ok(rx)
}
