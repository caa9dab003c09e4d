//! Typed accessors for one session's documents.
//!
//! Each per-session document has exactly one writer role per field, so
//! mutations here are read-merge-write without a lock: the current file is
//! re-read immediately before the change is applied and written back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::models::command::{CommandDocument, CommandResultDocument, CommandStatus};
use crate::models::notification::NotificationDocument;
use crate::models::question::{QuestionDocument, QuestionStatus, ResponseDocument};
use crate::models::session::SessionRecord;
use crate::store::layout::{DocumentCategory, StorageLayout};
use crate::store::record;
use crate::{AppError, Result};

/// Document access scoped to one session directory.
#[derive(Debug, Clone)]
pub struct SessionDocuments {
    layout: StorageLayout,
    session_id: String,
}

impl SessionDocuments {
    /// Scope accessors to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if `session_id` is unsafe.
    pub fn new(layout: StorageLayout, session_id: &str) -> Result<Self> {
        layout.session_dir(session_id)?;
        Ok(Self {
            layout,
            session_id: session_id.to_owned(),
        })
    }

    /// The session these accessors are scoped to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The underlying storage layout.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    // ── Session metadata ─────────────────────────────────────────────

    /// Current session record, if present and parsable.
    #[must_use]
    pub fn meta(&self) -> Option<SessionRecord> {
        let path = self.layout.meta_path(&self.session_id).ok()?;
        record::read_json(&path)
    }

    /// Write the session record wholesale. Only the registry creates records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn write_meta(&self, meta: &SessionRecord) -> Result<()> {
        record::write_json(&self.layout.meta_path(&self.session_id)?, meta)
    }

    /// Read-merge-write the session record. `apply` returns `false` to skip
    /// the write. Returns the record as written, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn update_meta(
        &self,
        apply: impl FnOnce(&mut SessionRecord) -> bool,
    ) -> Result<Option<SessionRecord>> {
        let path = self.layout.meta_path(&self.session_id)?;
        let Some(mut meta) = record::read_json::<SessionRecord>(&path) else {
            return Ok(None);
        };
        if apply(&mut meta) {
            record::write_json(&path, &meta)?;
        }
        Ok(Some(meta))
    }

    // ── Questions and responses ──────────────────────────────────────

    /// Persist a question document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn write_question(&self, question: &QuestionDocument) -> Result<()> {
        self.write(DocumentCategory::Questions, &question.question_id, question)
    }

    /// Read one question.
    #[must_use]
    pub fn question(&self, question_id: &str) -> Option<QuestionDocument> {
        self.read(DocumentCategory::Questions, question_id)
    }

    /// All readable questions, oldest first.
    #[must_use]
    pub fn questions(&self) -> Vec<QuestionDocument> {
        let mut items: Vec<QuestionDocument> = self.read_all(DocumentCategory::Questions);
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        items
    }

    /// Read-merge-write one question.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn update_question(
        &self,
        question_id: &str,
        apply: impl FnOnce(&mut QuestionDocument) -> bool,
    ) -> Result<Option<QuestionDocument>> {
        self.update(DocumentCategory::Questions, question_id, apply)
    }

    /// The response to `question_id`, if one was written.
    #[must_use]
    pub fn response(&self, question_id: &str) -> Option<ResponseDocument> {
        self.read(DocumentCategory::Responses, question_id)
    }

    /// Record a human answer and mark the question answered.
    ///
    /// A response that already exists wins; this check narrows but does
    /// not close the window for two racing answer sources.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown question,
    /// `AppError::InvalidTransition` if it is already answered or expired,
    /// or `AppError::Io` if a write fails.
    pub fn record_response(
        &self,
        question_id: &str,
        answer: &str,
        responder: Option<&str>,
        source: &str,
    ) -> Result<ResponseDocument> {
        let question = self
            .question(question_id)
            .ok_or_else(|| AppError::NotFound(format!("question {question_id} not found")))?;

        if self.response(question_id).is_some() {
            return Err(AppError::InvalidTransition(format!(
                "question {question_id} already has a response"
            )));
        }
        if !question.is_pending() {
            return Err(AppError::InvalidTransition(format!(
                "question {question_id} is no longer pending"
            )));
        }

        let response = ResponseDocument::new(
            &question,
            answer.to_owned(),
            responder.map(str::to_owned),
            source,
        );
        self.write(DocumentCategory::Responses, question_id, &response)?;

        let now = response.created_at;
        self.update_question(question_id, |q| q.resolve(QuestionStatus::Answered, now))?;
        Ok(response)
    }

    /// Mark a pending question expired. Returns `false` if it was not pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn expire_question(&self, question_id: &str) -> Result<bool> {
        let now = chrono::Utc::now();
        let mut changed = false;
        self.update_question(question_id, |q| {
            changed = q.resolve(QuestionStatus::Expired, now);
            changed
        })?;
        Ok(changed)
    }

    // ── Notifications ────────────────────────────────────────────────

    /// Persist a notification document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn write_notification(&self, notification: &NotificationDocument) -> Result<()> {
        self.write(
            DocumentCategory::Notifications,
            &notification.notification_id,
            notification,
        )
    }

    /// All readable notifications, oldest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<NotificationDocument> {
        let mut items: Vec<NotificationDocument> = self.read_all(DocumentCategory::Notifications);
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.notification_id.cmp(&b.notification_id))
        });
        items
    }

    /// Read-merge-write one notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn update_notification(
        &self,
        notification_id: &str,
        apply: impl FnOnce(&mut NotificationDocument) -> bool,
    ) -> Result<Option<NotificationDocument>> {
        self.update(DocumentCategory::Notifications, notification_id, apply)
    }

    // ── Commands and results ─────────────────────────────────────────

    /// Persist a command document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn write_command(&self, command: &CommandDocument) -> Result<()> {
        self.write(DocumentCategory::Commands, &command.command_id, command)
    }

    /// Read one command.
    #[must_use]
    pub fn command(&self, command_id: &str) -> Option<CommandDocument> {
        self.read(DocumentCategory::Commands, command_id)
    }

    /// All readable commands, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandDocument> {
        let mut items: Vec<CommandDocument> = self.read_all(DocumentCategory::Commands);
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        items
    }

    /// Move every pending command to `acknowledged` and return them, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a write fails; commands acknowledged before
    /// the failure stay acknowledged.
    pub fn take_pending_commands(&self) -> Result<Vec<CommandDocument>> {
        let now = chrono::Utc::now();
        let mut taken = Vec::new();
        for command in self.commands() {
            if command.status != CommandStatus::Pending {
                continue;
            }
            let mut claimed = false;
            let updated = self.update(
                DocumentCategory::Commands,
                &command.command_id,
                |c: &mut CommandDocument| {
                    claimed = c.status == CommandStatus::Pending;
                    if claimed {
                        c.status = CommandStatus::Acknowledged;
                        c.acknowledged_at = Some(now);
                    }
                    claimed
                },
            )?;
            if let Some(cmd) = updated.filter(|_| claimed) {
                taken.push(cmd);
            }
        }
        Ok(taken)
    }

    /// Persist a command result and mark the command completed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` for an unsafe id or `AppError::Io`
    /// if a write fails.
    pub fn write_command_result(
        &self,
        command_id: &str,
        output: &str,
        success: bool,
    ) -> Result<CommandResultDocument> {
        let result = CommandResultDocument::new(
            self.session_id.clone(),
            command_id.to_owned(),
            output.to_owned(),
            success,
        );
        self.write(DocumentCategory::CommandResults, command_id, &result)?;

        let updated = self.update(
            DocumentCategory::Commands,
            command_id,
            |c: &mut CommandDocument| {
                if c.status == CommandStatus::Completed {
                    return false;
                }
                c.status = CommandStatus::Completed;
                true
            },
        )?;
        if updated.is_none() {
            debug!(command_id, "result reported for unknown command");
        }
        Ok(result)
    }

    /// All readable command results, oldest first.
    #[must_use]
    pub fn command_results(&self) -> Vec<CommandResultDocument> {
        let mut items: Vec<CommandResultDocument> =
            self.read_all(DocumentCategory::CommandResults);
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        items
    }

    /// Read-merge-write one command result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn update_command_result(
        &self,
        command_id: &str,
        apply: impl FnOnce(&mut CommandResultDocument) -> bool,
    ) -> Result<Option<CommandResultDocument>> {
        self.update(DocumentCategory::CommandResults, command_id, apply)
    }

    // ── Generic helpers ──────────────────────────────────────────────

    fn write<T: Serialize>(&self, category: DocumentCategory, id: &str, value: &T) -> Result<()> {
        let path = self.layout.record_path(&self.session_id, category, id)?;
        record::write_json(&path, value)
    }

    fn read<T: DeserializeOwned>(&self, category: DocumentCategory, id: &str) -> Option<T> {
        let path = self.layout.record_path(&self.session_id, category, id).ok()?;
        record::read_json(&path)
    }

    fn read_all<T: DeserializeOwned>(&self, category: DocumentCategory) -> Vec<T> {
        let Ok(dir) = self.layout.category_dir(&self.session_id, category) else {
            return Vec::new();
        };
        record::list_record_ids(&dir)
            .iter()
            .filter_map(|id| self.read(category, id))
            .collect()
    }

    fn update<T: Serialize + DeserializeOwned>(
        &self,
        category: DocumentCategory,
        id: &str,
        apply: impl FnOnce(&mut T) -> bool,
    ) -> Result<Option<T>> {
        let path = self.layout.record_path(&self.session_id, category, id)?;
        let Some(mut value) = record::read_json::<T>(&path) else {
            return Ok(None);
        };
        if apply(&mut value) {
            record::write_json(&path, &value)?;
        }
        Ok(Some(value))
    }
}
