#[cfg(test)]
#[path = "utils_test.rs"]
mod tests;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Message;

static SLASH_COMMAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*/\w+").unwrap());

/// Host commands like `/clear` or `/summarize`. These are never sent to
/// a provider and never appended to history.
pub fn is_slash_command(text: &str) -> bool {
    SLASH_COMMAND.is_match(text)
}

/// Prepares prior turns for a provider request: slash-command turns
/// are dropped (with the reply that followed them), then the sequence
/// is cut at the first second consecutive user turn.
pub(crate) fn prepare_turns(mut turns: Vec<Message>) -> Vec<Message> {
    drop_slash_commands(&mut turns);
    truncate_consecutive_users(&mut turns);
    turns
}

/// Removes every user turn carrying a slash-command marker together
/// with the message immediately following it.
pub(crate) fn drop_slash_commands(turns: &mut Vec<Message>) {
    let mut i = 0;
    while i < turns.len() {
        if turns[i].is_user() && is_slash_command(turns[i].content()) {
            turns.remove(i);
            if i < turns.len() {
                turns.remove(i);
            }
        } else {
            i += 1;
        }
    }
}

/// Providers reject back-to-back user turns. Keeps everything up to and
/// including the first of a consecutive user pair.
pub(crate) fn truncate_consecutive_users(turns: &mut Vec<Message>) {
    let mut prev_user = false;
    for i in 0..turns.len() {
        let is_user = turns[i].is_user();
        if is_user && prev_user {
            turns.truncate(i);
            return;
        }
        prev_user = is_user;
    }
}

/// System prompt assembly order: referenced note, configured system
/// role, external prompt file.
pub fn build_system_prompt(
    reference: Option<&str>,
    system_role: Option<&str>,
    prompt_file: Option<&str>,
) -> String {
    [reference, system_role, prompt_file]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
