//! Topic-based notification bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use game_core::{Action, GameId, Push};

/// Topics for notification routing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    /// Actions committed to a game's log
    Append,
    /// Suffixes removed by an undo
    Undo,
}

/// Change notification emitted after a successful log commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    ActionsAppended {
        game_id: GameId,
        actions: Vec<Action>,
    },
    ActionsUndone {
        game_id: GameId,
        undone_action: Action,
        redone_actions: Vec<Action>,
        /// Every removed action, target first.
        undone_actions: Vec<Action>,
    },
}

impl Notification {
    pub fn topic(&self) -> Topic {
        match self {
            Notification::ActionsAppended { .. } => Topic::Append,
            Notification::ActionsUndone { .. } => Topic::Undo,
        }
    }

    pub fn game_id(&self) -> &GameId {
        match self {
            Notification::ActionsAppended { game_id, .. } | Notification::ActionsUndone { game_id, .. } => game_id,
        }
    }
}

impl From<Notification> for Push {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::ActionsAppended { game_id, actions } => Push::Appended { game_id, actions },
            Notification::ActionsUndone {
                game_id,
                undone_action,
                redone_actions,
                undone_actions,
            } => Push::Undone {
                game_id,
                undone_action,
                redone_actions,
                undone_actions,
            },
        }
    }
}

/// Topic-based notification bus
///
/// Allows consumers to subscribe to specific topics and only receive
/// notifications they care about. Delivery is best effort: with no
/// subscribers a notification is dropped.
#[derive(Clone)]
pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<Notification>>,
}

impl EventBus {
    /// Creates a new bus with default capacity for each topic
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Creates a new bus with specified capacity per topic
    pub fn with_capacity(capacity: usize) -> Self {
        let channels = [Topic::Append, Topic::Undo]
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self { channels }
    }

    /// Publish a notification to its corresponding topic
    pub fn publish(&self, notification: Notification) {
        let topic = notification.topic();
        if let Some(tx) = self.channels.get(&topic)
            && tx.send(notification).is_err()
        {
            tracing::trace!(%topic, "no subscribers");
        }
    }

    /// Subscribe to a specific topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Notification> {
        match self.channels.get(&topic) {
            Some(tx) => tx.subscribe(),
            // Every topic gets a channel in `with_capacity`.
            None => broadcast::channel(1).1,
        }
    }

    /// Subscribe to multiple topics
    pub fn subscribe_multiple(&self, topics: &[Topic]) -> HashMap<Topic, broadcast::Receiver<Notification>> {
        topics.iter().map(|&topic| (topic, self.subscribe(topic))).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
