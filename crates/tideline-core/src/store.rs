//! Conversation message store.
//!
//! Holds the client-side view of every conversation: messages ordered by
//! timestamp, optimistic entries for sends that have not been acknowledged
//! yet, and per-conversation summary data (unread count, last message).
//!
//! All mutation goes through one of three paths, and all three preserve the
//! ordering invariants:
//! - [`MessageStore::append_optimistic`] inserts a locally-authored message
//!   before the server has seen it.
//! - [`MessageStore::confirm`] upgrades an optimistic entry in place once the
//!   server acknowledges it.
//! - [`MessageStore::merge_incoming`] folds a server snapshot (push frame or
//!   poll result) into a conversation, deduplicating by server ID and
//!   recognizing echoes of optimistic sends.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tideline_proto::WireMessage;

use crate::error::MergeInvariantViolation;

/// Server-assigned user identifier.
pub type UserId = u64;

/// How far a server echo's timestamp may drift from the optimistic entry it
/// confirms. The server stamps messages on receipt, so clock skew and transit
/// latency both land inside this window in practice.
const CONFIRM_TOLERANCE: Duration = Duration::seconds(5);

/// Identity of a message within the store.
///
/// Local IDs exist only until the server acknowledges the message; they are
/// never reused and never collide with server IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Assigned by the server. Stable and globally unique.
    Server(u64),
    /// Assigned by this client for an optimistic entry.
    Local(u64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "local-{id}"),
        }
    }
}

/// Delivery progress of a locally-authored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Not yet handed to any transport.
    Pending,
    /// Accepted by the WebSocket transport; HTTP acknowledgement outstanding.
    Sent,
    /// The HTTP submission failed. The entry stays visible for retry.
    Failed,
    /// Acknowledged by the server. Terminal.
    Confirmed,
}

/// A single message as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Store-level identity.
    pub id: MessageId,
    /// User ID of the author.
    pub sender_id: UserId,
    /// User ID of the recipient.
    pub receiver_id: UserId,
    /// Message body.
    pub content: String,
    /// Ordering timestamp. Client-stamped until confirmed, then the
    /// server's.
    pub timestamp: DateTime<Utc>,
    /// Delivery progress. Always `Confirmed` for messages that originated on
    /// the server.
    pub delivery: DeliveryState,
}

impl Message {
    fn from_wire(wire: &WireMessage) -> Self {
        Self {
            id: MessageId::Server(wire.id),
            sender_id: wire.sender_id,
            receiver_id: wire.receiver_id,
            content: wire.content.clone(),
            timestamp: wire.timestamp,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// One conversation with another user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// The other participant's user ID. Doubles as the conversation key.
    pub other_user_id: UserId,
    /// Display name of the other participant, when known.
    pub other_username: Option<String>,
    /// Messages in ascending timestamp order.
    pub messages: Vec<Message>,
    /// Messages from the other user not yet marked read.
    pub unread_count: u32,
    /// Body of the most recent message, for conversation lists.
    pub last_message: Option<String>,
}

impl Conversation {
    fn new(other_user_id: UserId) -> Self {
        Self {
            other_user_id,
            other_username: None,
            messages: Vec::new(),
            unread_count: 0,
            last_message: None,
        }
    }

    fn contains_server_id(&self, id: u64) -> bool {
        self.messages
            .iter()
            .any(|m| m.id == MessageId::Server(id))
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Insertion index keeping ascending timestamp order, with equal
    /// timestamps placed after existing entries.
    fn insert_index(&self, timestamp: DateTime<Utc>) -> usize {
        self.messages
            .partition_point(|m| m.timestamp <= timestamp)
    }

    fn insert_sorted(&mut self, message: Message) {
        let index = self.insert_index(message.timestamp);
        self.messages.insert(index, message);
    }

    fn refresh_summary(&mut self) {
        self.last_message = self.messages.last().map(|m| m.content.clone());
    }
}

/// Handle to an optimistic entry, returned by
/// [`MessageStore::append_optimistic`] and consumed by the delivery-state
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticHandle {
    /// Conversation the entry lives in.
    pub conversation: UserId,
    /// Local ID of the entry.
    pub local_id: u64,
}

/// What a merge did, for logging and assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Messages not previously known, inserted in order.
    pub inserted: usize,
    /// Optimistic entries recognized as echoes and confirmed in place.
    pub confirmed: usize,
    /// Messages already present, skipped.
    pub duplicates: usize,
}

/// Result of [`MessageStore::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The optimistic entry was upgraded (or superseded by an earlier merge
    /// of the same server message).
    Replaced,
    /// The optimistic entry was gone; the acknowledgement was folded in
    /// through the ordinary merge path instead.
    FellBack(MergeStats),
}

/// Client-side view of all conversations for one authenticated user.
#[derive(Debug, Clone)]
pub struct MessageStore {
    me: UserId,
    conversations: HashMap<UserId, Conversation>,
    next_local_id: u64,
}

impl MessageStore {
    /// Empty store for the given authenticated user.
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            conversations: HashMap::new(),
            next_local_id: 0,
        }
    }

    /// The authenticated user this store belongs to.
    pub fn me(&self) -> UserId {
        self.me
    }

    /// Conversation key for a message: whichever participant is not us.
    pub fn conversation_key(&self, wire: &WireMessage) -> UserId {
        if wire.sender_id == self.me {
            wire.receiver_id
        } else {
            wire.sender_id
        }
    }

    /// The conversation with `other`, if any messages exist.
    pub fn conversation(&self, other: UserId) -> Option<&Conversation> {
        self.conversations.get(&other)
    }

    /// All conversations, in arbitrary order.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    /// Record the other participant's display name.
    pub fn set_username(&mut self, other: UserId, username: impl Into<String>) {
        self.entry(other).other_username = Some(username.into());
    }

    /// Insert a locally-authored message before the server has seen it.
    ///
    /// The entry starts [`DeliveryState::Pending`] and is placed by its
    /// client-side timestamp, after any existing message with the same
    /// timestamp.
    pub fn append_optimistic(
        &mut self,
        other: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> OptimisticHandle {
        let local_id = self.next_local_id;
        self.next_local_id += 1;

        let message = Message {
            id: MessageId::Local(local_id),
            sender_id: self.me,
            receiver_id: other,
            content: content.into(),
            timestamp,
            delivery: DeliveryState::Pending,
        };

        let conversation = self.entry(other);
        conversation.insert_sorted(message);
        conversation.refresh_summary();
        self.check_invariants();

        OptimisticHandle {
            conversation: other,
            local_id,
        }
    }

    /// Mark an optimistic entry as accepted by the WebSocket transport.
    ///
    /// No-op if the entry was already confirmed or removed.
    pub fn mark_sent(&mut self, handle: OptimisticHandle) {
        self.set_delivery(handle, DeliveryState::Sent);
    }

    /// Mark an optimistic entry as failed. The entry stays in place so the
    /// user can see and retry it.
    pub fn mark_failed(&mut self, handle: OptimisticHandle) {
        self.set_delivery(handle, DeliveryState::Failed);
    }

    /// Upgrade an optimistic entry with the server's acknowledgement.
    ///
    /// The entry takes the server's ID and timestamp and moves to its final
    /// position. If a push or poll already merged the same server message,
    /// the optimistic entry is simply dropped. If the entry is gone entirely
    /// (already recognized by a tolerance match), the acknowledgement goes
    /// through [`Self::merge_incoming`] so it is never lost.
    pub fn confirm(&mut self, handle: OptimisticHandle, wire: &WireMessage) -> ConfirmOutcome {
        let other = handle.conversation;
        let Some(conversation) = self.conversations.get_mut(&other) else {
            let stats = self.merge_incoming(other, std::slice::from_ref(wire));
            return ConfirmOutcome::FellBack(stats);
        };

        let Some(index) = conversation.position_of(MessageId::Local(handle.local_id)) else {
            let stats = self.merge_incoming(other, std::slice::from_ref(wire));
            return ConfirmOutcome::FellBack(stats);
        };

        if conversation.contains_server_id(wire.id) {
            // A concurrent push beat the HTTP acknowledgement. The server
            // copy is authoritative; drop the optimistic one.
            conversation.messages.remove(index);
        } else {
            let mut message = conversation.messages.remove(index);
            message.id = MessageId::Server(wire.id);
            message.timestamp = wire.timestamp;
            message.content = wire.content.clone();
            message.delivery = DeliveryState::Confirmed;
            conversation.insert_sorted(message);
        }

        conversation.refresh_summary();
        self.check_invariants();
        ConfirmOutcome::Replaced
    }

    /// Fold a server snapshot into the conversation with `other`.
    ///
    /// Used for both push frames and poll results. Idempotent: messages
    /// already present by server ID are skipped, and an echo of an
    /// unacknowledged optimistic send (same participants, same content,
    /// timestamps within tolerance) confirms that entry instead of inserting
    /// a duplicate.
    pub fn merge_incoming(&mut self, other: UserId, batch: &[WireMessage]) -> MergeStats {
        let me = self.me;
        let mut stats = MergeStats::default();
        let conversation = self.entry(other);

        for wire in batch {
            if conversation.contains_server_id(wire.id) {
                stats.duplicates += 1;
                continue;
            }

            if let Some(index) = find_echo(conversation, me, wire) {
                let mut message = conversation.messages.remove(index);
                message.id = MessageId::Server(wire.id);
                message.timestamp = wire.timestamp;
                message.delivery = DeliveryState::Confirmed;
                conversation.insert_sorted(message);
                stats.confirmed += 1;
                continue;
            }

            conversation.insert_sorted(Message::from_wire(wire));
            if wire.sender_id == other {
                conversation.unread_count += 1;
            }
            stats.inserted += 1;
        }

        conversation.refresh_summary();
        self.check_invariants();
        stats
    }

    /// Clear the unread counter for the conversation with `other` and return
    /// the server IDs of the messages that were unread, newest last.
    pub fn mark_read(&mut self, other: UserId) -> Vec<u64> {
        let Some(conversation) = self.conversations.get_mut(&other) else {
            return Vec::new();
        };

        let unread = conversation.unread_count as usize;
        conversation.unread_count = 0;

        let mut ids: Vec<u64> = conversation
            .messages
            .iter()
            .rev()
            .filter(|m| m.sender_id == other)
            .take(unread)
            .filter_map(|m| match m.id {
                MessageId::Server(id) => Some(id),
                MessageId::Local(_) => None,
            })
            .collect();
        ids.reverse();
        ids
    }

    /// Check the ordering invariants of every conversation.
    ///
    /// Server IDs must be unique within a conversation and timestamps must
    /// be non-decreasing.
    pub fn validate(&self) -> Result<(), MergeInvariantViolation> {
        for conversation in self.conversations.values() {
            let key = conversation.other_user_id;
            let mut seen = std::collections::HashSet::new();

            for (index, message) in conversation.messages.iter().enumerate() {
                if let MessageId::Server(id) = message.id {
                    if !seen.insert(id) {
                        return Err(MergeInvariantViolation::DuplicateId {
                            conversation: key,
                            id,
                        });
                    }
                }

                if index > 0 && conversation.messages[index - 1].timestamp > message.timestamp {
                    return Err(MergeInvariantViolation::OutOfOrder {
                        conversation: key,
                        index: index - 1,
                    });
                }
            }
        }
        Ok(())
    }

    fn entry(&mut self, other: UserId) -> &mut Conversation {
        self.conversations
            .entry(other)
            .or_insert_with(|| Conversation::new(other))
    }

    fn set_delivery(&mut self, handle: OptimisticHandle, delivery: DeliveryState) {
        if let Some(conversation) = self.conversations.get_mut(&handle.conversation) {
            if let Some(index) = conversation.position_of(MessageId::Local(handle.local_id)) {
                conversation.messages[index].delivery = delivery;
            }
        }
    }

    fn check_invariants(&self) {
        debug_assert!(self.validate().is_ok(), "store invariants violated");
    }
}

/// Index of an optimistic entry that `wire` is an echo of, if any.
///
/// An echo is our own unconfirmed message with identical participants and
/// content whose client timestamp is within [`CONFIRM_TOLERANCE`] of the
/// server's.
fn find_echo(conversation: &Conversation, me: UserId, wire: &WireMessage) -> Option<usize> {
    if wire.sender_id != me {
        return None;
    }

    conversation.messages.iter().position(|m| {
        matches!(m.id, MessageId::Local(_))
            && matches!(m.delivery, DeliveryState::Pending | DeliveryState::Sent)
            && m.sender_id == wire.sender_id
            && m.receiver_id == wire.receiver_id
            && m.content == wire.content
            && (m.timestamp - wire.timestamp).abs() <= CONFIRM_TOLERANCE
    })
}
