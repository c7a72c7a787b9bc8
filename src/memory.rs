use crate::message::{Role, Turn};

/// In-memory transcript of the conversation. Append-only until cleared.
#[derive(Default, Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Ordered copy of every retained turn.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Turn> + '_ {
        self.turns.iter()
    }

    pub fn last_of(&self, role: Role) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == role)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
