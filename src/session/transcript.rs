use crate::types::ChatEntry;

/// The ordered chat transcript. A relay `history` replaces it wholesale,
/// each subsequent `message` appends; order is exactly relay delivery order
/// and nothing here reorders, dedups or expires entries.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, entries: impl IntoIterator<Item = ChatEntry>) {
        self.entries = entries.into_iter().collect();
    }

    pub fn append(&mut self, entry: ChatEntry) -> &ChatEntry {
        self.entries.push(entry);
        self.entries.last().unwrap_or_else(|| unreachable!())
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ChatEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
