//! Slack Block Kit message builders.
//!
//! Renders platform-neutral [`OutboundMessage`]s into blocks: severity
//! sections for notifications, answer buttons for questions, and plain
//! sections for everything else.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement, SlackBlockId,
    SlackBlockPlainTextOnly, SlackBlockText, SlackContextBlock, SlackContextBlockElement,
    SlackSectionBlock,
};

use crate::models::notification::NotificationLevel;
use crate::notifier::{MessageKind, OutboundMessage};

/// Prefix of answer button action ids; the suffix is the option index.
pub const ANSWER_ACTION_PREFIX: &str = "answer_";

/// Build a severity-formatted section block.
#[must_use]
pub fn severity_section(level: NotificationLevel, message: &str) -> SlackBlock {
    let prefix = match level {
        NotificationLevel::Success => "\u{2705}",
        NotificationLevel::Warning => "\u{26a0}\u{fe0f}",
        NotificationLevel::Error => "\u{274c}",
        NotificationLevel::Info => "\u{2139}\u{fe0f}",
    };
    text_section(&format!("{prefix} {message}"))
}

/// Build a plain markdown section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

/// Build a small grey context line.
#[must_use]
pub fn context_line(text: &str) -> SlackBlock {
    SlackBlock::Context(SlackContextBlock::new(vec![
        SlackContextBlockElement::MarkDown(text.into()),
    ]))
}

/// Build an actions block with the given `(action_id, label, value)` buttons.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[(String, String, String)]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|(action_id, text, value)| {
            SlackActionBlockElement::Button(
                SlackBlockButtonElement::new(SlackBlockPlainTextOnly::from(text.as_str()))
                    .with_action_id(action_id.as_str().into())
                    .with_value(value.clone()),
            )
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// Button value identifying one option of one question.
#[must_use]
pub fn answer_value(session_id: &str, question_id: &str, index: usize) -> String {
    format!("{session_id}/{question_id}/{index}")
}

/// Parse a button value produced by [`answer_value`].
#[must_use]
pub fn parse_answer_value(value: &str) -> Option<(String, String, usize)> {
    let mut parts = value.splitn(3, '/');
    let session_id = parts.next().filter(|s| !s.is_empty())?;
    let question_id = parts.next().filter(|s| !s.is_empty())?;
    let index = parts.next()?.parse().ok()?;
    Some((session_id.to_owned(), question_id.to_owned(), index))
}

/// Blocks for a question: the text, then one button per option or a hint
/// to reply in the thread.
#[must_use]
pub fn question_blocks(
    session_id: &str,
    question_id: &str,
    text: &str,
    options: &[String],
) -> Vec<SlackBlock> {
    let mut blocks = vec![text_section(&format!("\u{2753} *Question*\n{text}"))];
    if options.is_empty() {
        blocks.push(context_line("Reply in this thread to answer."));
    } else {
        let buttons: Vec<(String, String, String)> = options
            .iter()
            .enumerate()
            .map(|(idx, label)| {
                (
                    format!("{ANSWER_ACTION_PREFIX}{idx}"),
                    label.clone(),
                    answer_value(session_id, question_id, idx),
                )
            })
            .collect();
        blocks.push(action_buttons(&format!("question_{question_id}"), &buttons));
        blocks.push(context_line("Or reply in this thread with a custom answer."));
    }
    blocks
}

/// Text that replaces a question once it has been answered.
#[must_use]
pub fn answered_text(question: &str, answer: &str, responder: Option<&str>) -> String {
    let by = responder.map_or_else(String::new, |user| format!(" by <@{user}>"));
    format!("\u{2753} *Question*\n{question}\n\u{2705} Answered{by}: *{answer}*")
}

/// Render an outbound message into blocks.
#[must_use]
pub fn render(message: &OutboundMessage) -> Vec<SlackBlock> {
    match &message.kind {
        MessageKind::SessionThread { session_id } => vec![
            text_section(&format!("\u{1f916} {}", message.text)),
            context_line(&format!("session `{session_id}`")),
        ],
        MessageKind::Question {
            session_id,
            question_id,
            options,
        } => question_blocks(session_id, question_id, &message.text, options),
        MessageKind::QuestionAnswered | MessageKind::Plain => vec![text_section(&message.text)],
        MessageKind::Notification(level) => vec![severity_section(*level, &message.text)],
        MessageKind::CommandResult { success } => {
            let level = if *success {
                NotificationLevel::Success
            } else {
                NotificationLevel::Error
            };
            vec![severity_section(level, &message.text)]
        }
    }
}
