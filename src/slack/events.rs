//! Slack inbound event handlers.
//!
//! Two inbound paths reach the session documents:
//!
//! * answer buttons on a delivered question write the response document
//!   and replace the buttons with the chosen answer;
//! * plain replies inside a session thread answer the most recent pending
//!   delivered question, or become a command document when nothing is
//!   pending.
//!
//! Every path is gated by `authorized_user_ids`; unauthorized users are
//! logged and otherwise ignored.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackInteractionEvent, SlackMessageEvent, SlackPushEventCallback,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::command::CommandDocument;
use crate::models::question::{QuestionDocument, ResponseDocument};
use crate::models::{DeliveryHandle, ThreadHandle};
use crate::notifier::{DeliveryTarget, MessageKind, OutboundMessage};
use crate::registry::list_live_sessions;
use crate::slack::{blocks, BotState};
use crate::store::{SessionDocuments, StorageLayout};
use crate::{AppError, Result};

/// Source recorded on responses written from Slack.
pub const SLACK_SOURCE: &str = "slack";

/// Where a thread reply ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRoute {
    /// The reply answered a pending question.
    Answered {
        /// The question as it was before the answer.
        question: QuestionDocument,
        /// The written response.
        response: ResponseDocument,
    },
    /// No question was pending; the reply became a command.
    Command(CommandDocument),
}

// ── Storage-level routing ────────────────────────────────────────────

/// Record the answer encoded in an answer button value.
///
/// # Errors
///
/// Returns `AppError::PathViolation` for a malformed value,
/// `AppError::NotFound` for an unknown question or option, or the
/// errors of [`SessionDocuments::record_response`].
pub fn answer_from_button(
    layout: &StorageLayout,
    value: &str,
    user_id: &str,
) -> Result<(QuestionDocument, ResponseDocument)> {
    let (session_id, question_id, index) = blocks::parse_answer_value(value)
        .ok_or_else(|| AppError::PathViolation(format!("malformed answer value: {value}")))?;
    let documents = SessionDocuments::new(layout.clone(), &session_id)?;
    let question = documents
        .question(&question_id)
        .ok_or_else(|| AppError::NotFound(format!("question {question_id} not found")))?;
    let answer = question
        .options
        .as_ref()
        .and_then(|opts| opts.get(index))
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("option {index} of {question_id}")))?;

    let response = documents.record_response(&question_id, &answer, Some(user_id), SLACK_SOURCE)?;
    Ok((question, response))
}

/// Route a thread reply for `session_id`: answer the latest pending
/// delivered question, or else store the text as a command.
///
/// # Errors
///
/// Returns `AppError::PathViolation` for an invalid session id or the
/// write errors of the underlying document operations.
pub fn route_thread_reply(
    layout: &StorageLayout,
    session_id: &str,
    text: &str,
    user_id: &str,
) -> Result<ReplyRoute> {
    let documents = SessionDocuments::new(layout.clone(), session_id)?;
    let latest_pending = documents
        .questions()
        .into_iter()
        .rev()
        .find(|q| q.is_pending() && q.delivery.is_some());

    if let Some(question) = latest_pending {
        let response =
            documents.record_response(&question.question_id, text, Some(user_id), SLACK_SOURCE)?;
        return Ok(ReplyRoute::Answered { question, response });
    }

    let command = CommandDocument::new(session_id.to_owned(), text.to_owned(), user_id.to_owned());
    documents.write_command(&command)?;
    Ok(ReplyRoute::Command(command))
}

/// Strip a leading `<@UXXXXX>` mention token.
fn strip_mention(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<@") {
        trimmed
            .split_once('>')
            .map_or(trimmed, |(_, rest)| rest.trim_start())
    } else {
        trimmed
    }
}

async fn bot_state(state: &SlackClientEventsUserState) -> Option<Arc<BotState>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<BotState>>().cloned()
}

/// Session owning a thread; falls back to scanning live session records
/// when the poller has not registered the thread yet.
async fn session_for_thread(state: &BotState, channel_id: &str, thread_ts: &str) -> Option<String> {
    if let Some(session_id) = state.threads.session_for(channel_id, thread_ts).await {
        return Some(session_id);
    }
    let wanted = ThreadHandle {
        channel_id: channel_id.to_owned(),
        thread_ts: thread_ts.to_owned(),
    };
    list_live_sessions(&state.layout)
        .into_iter()
        .find(|s| s.thread.as_ref() == Some(&wanted))
        .map(|s| s.session_id)
}

async fn mark_answered(
    state: &BotState,
    handle: DeliveryHandle,
    question: &QuestionDocument,
    response: &ResponseDocument,
) {
    let text = blocks::answered_text(&question.text, &response.answer, response.responder.as_deref());
    let message = OutboundMessage::new(text, MessageKind::QuestionAnswered);
    if let Err(err) = state.notifier.update(handle, message).await {
        warn!(%err, question_id = %question.question_id, "failed to update answered question");
    }
}

// ── Interactions ─────────────────────────────────────────────────────

/// Handle interactive payloads (answer buttons) delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged so Slack receives an acknowledgment.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackInteractionEvent::BlockActions(block_event) = &event else {
        debug!("unhandled interaction event type");
        return Ok(());
    };
    let Some(app) = bot_state(&state).await else {
        warn!("bot state not available; cannot process interaction");
        return Ok(());
    };

    let user_id = block_event
        .user
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_default();
    if user_id.is_empty() || !app.is_authorized(&user_id) {
        return Ok(());
    }

    let message_handle = match (block_event.channel.as_ref(), block_event.message.as_ref()) {
        (Some(channel), Some(message)) => Some(DeliveryHandle {
            channel_id: channel.id.to_string(),
            message_ts: message.origin.ts.to_string(),
        }),
        _ => None,
    };

    for action in block_event.actions.iter().flatten() {
        let action_id = action.action_id.to_string();
        if !action_id.starts_with(blocks::ANSWER_ACTION_PREFIX) {
            warn!(action_id, "unknown action_id");
            continue;
        }
        let Some(value) = action.value.as_deref() else {
            warn!(action_id, "answer action without value");
            continue;
        };

        let span = info_span!("answer_button", user_id = %user_id, action_id = %action_id);
        async {
            match answer_from_button(&app.layout, value, &user_id) {
                Ok((question, response)) => {
                    info!(question_id = %question.question_id, "question answered from slack");
                    let handle = question.delivery.clone().or_else(|| message_handle.clone());
                    if let Some(handle) = handle {
                        mark_answered(&app, handle, &question, &response).await;
                    }
                }
                Err(AppError::InvalidTransition(reason)) => {
                    info!(%reason, "answer ignored");
                }
                Err(err) => warn!(%err, "answer button failed"),
            }
        }
        .instrument(span)
        .await;
    }
    Ok(())
}

// ── Push events ──────────────────────────────────────────────────────

/// Handle Events API pushes; only thread replies are acted on.
///
/// # Errors
///
/// Never fails; problems are logged.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        return Ok(());
    };
    let Some(app) = bot_state(&state).await else {
        warn!("bot state not available; cannot process message");
        return Ok(());
    };
    handle_thread_message(&app, &message).await;
    Ok(())
}

async fn handle_thread_message(state: &BotState, message: &SlackMessageEvent) {
    if message.sender.bot_id.is_some() || message.subtype.is_some() {
        return;
    }
    let (Some(channel), Some(thread_ts)) =
        (message.origin.channel.as_ref(), message.origin.thread_ts.as_ref())
    else {
        return;
    };
    let Some(user_id) = message.sender.user.as_ref().map(ToString::to_string) else {
        return;
    };
    let text = message
        .content
        .as_ref()
        .and_then(|c| c.text.as_deref())
        .map(strip_mention)
        .unwrap_or_default()
        .trim()
        .to_owned();
    if text.is_empty() {
        return;
    }

    let channel_id = channel.to_string();
    let thread_ts = thread_ts.to_string();
    let Some(session_id) = session_for_thread(state, &channel_id, &thread_ts).await else {
        debug!(%channel_id, %thread_ts, "reply in a thread no session owns");
        return;
    };
    if !state.is_authorized(&user_id) {
        return;
    }

    let span = info_span!("thread_reply", session_id = %session_id, user_id = %user_id);
    async {
        match route_thread_reply(&state.layout, &session_id, &text, &user_id) {
            Ok(ReplyRoute::Answered { question, response }) => {
                info!(question_id = %question.question_id, "thread reply answered question");
                if let Some(handle) = question.delivery.clone() {
                    mark_answered(state, handle, &question, &response).await;
                }
            }
            Ok(ReplyRoute::Command(command)) => {
                info!(command_id = %command.command_id, "thread reply stored as command");
                let target = DeliveryTarget::Thread(ThreadHandle {
                    channel_id: channel_id.clone(),
                    thread_ts: thread_ts.clone(),
                });
                let ack = OutboundMessage::plain(format!(
                    "\u{1f4e8} Forwarded to the agent as a command: `{}`",
                    command.text
                ));
                if let Err(err) = state.notifier.deliver(target, ack).await {
                    warn!(%err, "failed to acknowledge command");
                }
            }
            Err(err) => warn!(%err, "failed to route thread reply"),
        }
    }
    .instrument(span)
    .await;
}
