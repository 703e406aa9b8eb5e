use std::collections::HashSet;

use crate::message::MessageType;

/// Classifies outbound messages as critical (reliable channel only) or droppable.
///
/// Control messages are always critical. By default only routine position, viewport and
/// cursor updates are droppable.
#[derive(Clone, Debug)]
pub struct RoutingPolicy {
    non_critical: HashSet<MessageType>,
}

impl RoutingPolicy {
    pub fn new(non_critical: impl IntoIterator<Item = MessageType>) -> Self {
        Self {
            non_critical: non_critical
                .into_iter()
                .filter(|kind| !kind.is_control())
                .collect(),
        }
    }

    /// Every message goes over the reliable channel
    pub fn all_critical() -> Self {
        Self {
            non_critical: HashSet::new(),
        }
    }

    pub fn with_non_critical(mut self, kind: MessageType) -> Self {
        if !kind.is_control() {
            self.non_critical.insert(kind);
        }
        self
    }

    pub fn is_critical(&self, kind: MessageType) -> bool {
        kind.is_control() || !self.non_critical.contains(&kind)
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new([
            MessageType::POSITION_UPDATE,
            MessageType::VIEWPORT_UPDATE,
            MessageType::CURSOR_UPDATE,
        ])
    }
}
