//! Message store — thread-safe keyed records with guarded status
//! transitions and due-message queries for the queue processor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use courier_core::message::{Message, MessageStatus};
use courier_core::{CourierError, CourierResult};

/// Thread-safe message store backed by `DashMap`.
///
/// All mutation goes through [`MessageStore::update`] or
/// [`MessageStore::claim_for_sending`], which hold the per-key lock for
/// the whole read-modify-write, so a retry task and a late duplicate
/// delivery can never interleave on the same message.
pub struct MessageStore {
    messages: DashMap<Uuid, Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
        }
    }

    pub fn insert(&self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.insert(id, message);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Message> {
        self.messages.get(id).map(|m| m.clone())
    }

    /// Atomically update the message through `f` under the per-key lock.
    ///
    /// The update is rejected if it would move the message out of a
    /// terminal status or push `retry_count` past `max_retries`.
    pub fn update<F>(&self, id: &Uuid, f: F) -> CourierResult<Message>
    where
        F: FnOnce(&mut Message),
    {
        let mut entry = self
            .messages
            .get_mut(id)
            .ok_or(CourierError::MessageNotFound(*id))?;

        let prior_status = entry.status;
        let mut updated = entry.clone();
        f(&mut updated);

        if prior_status.is_terminal() && updated.status != prior_status {
            return Err(CourierError::InvalidTransition(format!(
                "{:?} is terminal, cannot move to {:?}",
                prior_status, updated.status
            )));
        }
        if updated.retry_count > updated.max_retries {
            return Err(CourierError::InvalidTransition(format!(
                "retry_count {} would exceed max_retries {}",
                updated.retry_count, updated.max_retries
            )));
        }

        updated.updated_at = Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }

    /// Compare-and-set claim: move the message to `Sending` iff it is
    /// currently `Queued` or `PendingRetry`.
    ///
    /// Returns `None` when the message was already claimed, cancelled, or
    /// finished — the caller must skip it without logging an attempt.
    pub fn claim_for_sending(&self, id: &Uuid) -> CourierResult<Option<Message>> {
        let mut entry = self
            .messages
            .get_mut(id)
            .ok_or(CourierError::MessageNotFound(*id))?;

        match entry.status {
            MessageStatus::Queued | MessageStatus::PendingRetry => {
                entry.status = MessageStatus::Sending;
                entry.updated_at = Utc::now();
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Messages due for processing: `Queued` or `PendingRetry`, not
    /// soft-deleted, with `scheduled_at <= now`. Oldest scheduled first,
    /// capped at `limit`.
    pub fn due_messages(&self, now: DateTime<Utc>, limit: usize) -> Vec<Message> {
        let mut due: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| {
                let m = entry.value();
                !m.deleted
                    && matches!(m.status, MessageStatus::Queued | MessageStatus::PendingRetry)
                    && m.scheduled_at <= now
            })
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        due.truncate(limit);
        due
    }

    /// All messages belonging to a campaign, soft-deleted ones excluded.
    pub fn for_campaign(&self, campaign_id: &Uuid) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|entry| entry.value().campaign_id == *campaign_id && !entry.value().deleted)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Administrative requeue of a `Failed` message with retry budget
    /// remaining: status back to `Queued`, scheduled immediately, retry
    /// count consumed.
    ///
    /// This is the one sanctioned exit from a terminal status; automatic
    /// engine transitions never leave `Failed`.
    pub fn requeue_failed(&self, id: &Uuid) -> CourierResult<Message> {
        let mut entry = self
            .messages
            .get_mut(id)
            .ok_or(CourierError::MessageNotFound(*id))?;

        if entry.status != MessageStatus::Failed {
            return Err(CourierError::InvalidTransition(format!(
                "only failed messages can be requeued, status is {:?}",
                entry.status
            )));
        }
        if entry.retry_count >= entry.max_retries {
            return Err(CourierError::InvalidTransition(
                "maximum retry attempts reached".to_string(),
            ));
        }

        entry.status = MessageStatus::Queued;
        entry.error_message = None;
        entry.scheduled_at = Utc::now();
        entry.retry_count += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Soft-delete: the row stays, queries skip it.
    pub fn soft_delete(&self, id: &Uuid) -> CourierResult<()> {
        let mut entry = self
            .messages
            .get_mut(id)
            .ok_or(CourierError::MessageNotFound(*id))?;
        entry.deleted = true;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
