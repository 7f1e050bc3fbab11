//! Operator button presses on queue notifications.
//!
//! Every notification carries Posted / Skip / Reject buttons. Reject asks for
//! a second press before the media is locked for good.

use anyhow::Result;

/// Action encoded in a button's callback data as `<verb>:<queue item id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Posted(i64),
    Skip(i64),
    /// First press on Reject; only asks for confirmation.
    Reject(i64),
    ConfirmReject(i64),
    /// Reject was withdrawn; the item stays pending.
    Keep(i64),
}

impl OperatorAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (verb, id) = data.split_once(':')?;
        let id: i64 = id.parse().ok()?;
        match verb {
            "posted" => Some(OperatorAction::Posted(id)),
            "skip" => Some(OperatorAction::Skip(id)),
            "reject" => Some(OperatorAction::Reject(id)),
            "reject_confirm" => Some(OperatorAction::ConfirmReject(id)),
            "keep" => Some(OperatorAction::Keep(id)),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> String {
        match self {
            OperatorAction::Posted(id) => format!("posted:{}", id),
            OperatorAction::Skip(id) => format!("skip:{}", id),
            OperatorAction::Reject(id) => format!("reject:{}", id),
            OperatorAction::ConfirmReject(id) => format!("reject_confirm:{}", id),
            OperatorAction::Keep(id) => format!("keep:{}", id),
        }
    }
}

/// Buttons under a fresh notification.
pub fn action_buttons(queue_item_id: i64) -> Vec<Vec<(&'static str, String)>> {
    vec![vec![
        ("Posted", OperatorAction::Posted(queue_item_id).callback_data()),
        ("Skip", OperatorAction::Skip(queue_item_id).callback_data()),
        ("Reject", OperatorAction::Reject(queue_item_id).callback_data()),
    ]]
}

/// Buttons shown after the first Reject press.
pub fn confirm_reject_buttons(queue_item_id: i64) -> Vec<Vec<(&'static str, String)>> {
    vec![vec![
        ("Confirm reject", OperatorAction::ConfirmReject(queue_item_id).callback_data()),
        ("Keep", OperatorAction::Keep(queue_item_id).callback_data()),
    ]]
}

/// One button press pulled from the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorCallback {
    pub callback_id: String,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub actor: Option<String>,
    pub data: Option<String>,
}

/// Presses from one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackBatch {
    /// Offset that confirms every update seen, including ones that were
    /// not button presses.
    pub next_offset: Option<i64>,
    pub callbacks: Vec<OperatorCallback>,
}

/// What the operator is told after a press, and how the message changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReply {
    /// Item resolved; the buttons are removed.
    Resolved(&'static str),
    /// Swap the buttons for the confirmation pair.
    ConfirmReject(i64),
    /// Put the original buttons back.
    Restore(i64),
    AlreadyResolved,
    /// Unknown data or a chat that owns no schedule.
    Ignored,
}

impl ActionReply {
    pub fn text(&self) -> &'static str {
        match self {
            ActionReply::Resolved(text) => text,
            ActionReply::ConfirmReject(_) => "Reject permanently? This media will never be scheduled again.",
            ActionReply::Restore(_) => "Kept in the queue",
            ActionReply::AlreadyResolved => "Already handled",
            ActionReply::Ignored => "Not available",
        }
    }
}

/// Source of button presses. Implemented over the Telegram Bot API.
pub trait CallbackSource: Send + Sync {
    /// Presses with an update id of at least `offset`, oldest first.
    fn poll_callbacks(&self, offset: i64) -> Result<CallbackBatch>;

    /// Acknowledge a press and update the message's buttons.
    fn reply(&self, callback: &OperatorCallback, reply: &ActionReply) -> Result<()>;
}
