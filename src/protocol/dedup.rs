use std::collections::VecDeque;

/// Sliding window of recently seen message ids.
///
/// Servers redeliver the tail of a channel after a reconnect; the window
/// lets the client drop those copies.
#[derive(Debug, Clone)]
pub struct RecentMessageIds {
    ids: VecDeque<String>,
    capacity: usize,
}

impl RecentMessageIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub fn observe(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.ids.iter().any(|seen| seen == id) {
            return false;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
