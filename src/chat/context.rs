//! Turns a project's prompt, recent history and attached files into the
//! ordered sequence of turns submitted to the model for one exchange.

use crate::genai::{FileData, Turn, TurnRole};

use super::MessageRole;

/// Number of prior messages carried into a new request. Older messages are dropped.
pub const HISTORY_WINDOW: i64 = 10;

pub const SYSTEM_INSTRUCTION_MARKER: &str = "System Instruction:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ContextInput<'a> {
    pub system_prompt: &'a str,
    /// Already windowed, oldest first.
    pub history: &'a [HistoryEntry],
    pub project_files: &'a [FileData],
    pub message: &'a str,
    /// File sent together with this message, attached to the final turn.
    pub attachment: Option<&'a FileData>,
}

pub fn assemble_context(input: ContextInput<'_>) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(input.history.len() + input.project_files.len() + 2);

    turns.push(Turn::user_text(format!(
        "{SYSTEM_INSTRUCTION_MARKER} {}",
        input.system_prompt
    )));

    turns.extend(input.history.iter().map(|entry| Turn::Text {
        role: turn_role(entry.role),
        text: entry.content.clone(),
    }));

    let current_uri = input.attachment.map(|file| file.file_uri.as_str());
    turns.extend(
        input
            .project_files
            .iter()
            .filter(|file| Some(file.file_uri.as_str()) != current_uri)
            .cloned()
            .map(Turn::user_file),
    );

    turns.push(match input.attachment {
        Some(file) => Turn::Mixed {
            role: TurnRole::User,
            text: input.message.to_string(),
            file: file.clone(),
        },
        None => Turn::user_text(input.message),
    });

    turns
}

fn turn_role(role: MessageRole) -> TurnRole {
    match role {
        MessageRole::Assistant => TurnRole::Model,
        MessageRole::User => TurnRole::User,
    }
}
