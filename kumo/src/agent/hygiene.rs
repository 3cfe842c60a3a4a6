//! Preflight message hygiene.
//!
//! Before every model call the event loop repairs the outgoing
//! conversation: orphaned tool uses left behind by interrupted turns are
//! removed, and blank assistant text is normalized into a shape providers
//! accept. Both passes are idempotent.

use std::collections::HashSet;

use tracing::debug;

use crate::message::{ContentBlock, Message, Role};

/// Replacement for an empty assistant text block.
const BLANK_TEXT: &str = "[blank text]";

/// Normalize blank assistant text blocks.
///
/// For each assistant message: if it contains any tool-use block, text
/// blocks whose trimmed text is empty are removed; otherwise empty text
/// blocks are replaced with the literal `"[blank text]"`.
pub(crate) fn normalize_blank_text(messages: &mut [Message]) {
    for message in messages.iter_mut().filter(|m| m.role == Role::Assistant) {
        if message.has_tool_use() {
            message.content.retain(|block| !block.is_blank_text());
        } else {
            for block in &mut message.content {
                if block.is_blank_text() {
                    *block = ContentBlock::text(BLANK_TEXT);
                }
            }
        }
    }
}

/// Remove orphaned, empty-input tool uses from the conversation.
///
/// A tool use is orphaned when its input is empty and no tool result with
/// the same id exists anywhere in the conversation. Fixes are applied in
/// reverse positional order so indices stay valid:
///
/// - a message whose only block is the orphan gets a single text block
///   noting the canceled operation;
/// - otherwise the orphan block is removed.
///
/// Tool uses with non-empty input are left alone even when unanswered.
pub(crate) fn clean_orphaned_tool_uses(messages: &mut [Message]) {
    let answered: HashSet<&str> = messages
        .iter()
        .flat_map(|m| m.tool_results())
        .map(|r| r.tool_use_id.as_str())
        .collect();

    let mut orphans: Vec<(usize, usize, String)> = Vec::new();
    for (msg_idx, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant {
            continue;
        }
        for (block_idx, block) in message.content.iter().enumerate() {
            if let ContentBlock::ToolUse(tool_use) = block
                && tool_use.input_is_empty()
                && !answered.contains(tool_use.id.as_str())
            {
                orphans.push((msg_idx, block_idx, tool_use.name.clone()));
            }
        }
    }

    for (msg_idx, block_idx, name) in orphans.into_iter().rev() {
        debug!(tool = %name, "removing orphaned tool use");
        let message = &mut messages[msg_idx];
        if message.content.len() == 1 {
            message.content = vec![ContentBlock::text(format!(
                "[Attempted to use {name}, but operation was canceled]"
            ))];
        } else {
            message.content.remove(block_idx);
        }
    }
}
