use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One completed exchange: the rewritten user query and the final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Bounded conversation history of one session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,

    /// Oldest first, never longer than `capacity`
    history: VecDeque<Turn>,
    capacity: usize,

    /// Completed turns over the session lifetime (not capped)
    pub turns: u64,

    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        let now = Instant::now();
        let capacity = capacity.max(1);
        Self {
            session_id: session_id.into(),
            history: VecDeque::with_capacity(capacity),
            capacity,
            turns: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a turn, dropping the oldest entries beyond capacity.
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push_back(turn);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.turns += 1;
        self.touch();
    }

    /// The last `n` turns in chronological order.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }
}
