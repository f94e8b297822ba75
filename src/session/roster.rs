use crate::relay::events::WireUser;
use crate::types::RosterEntry;

/// Flat participant roster. Each `update_users` snapshot replaces the whole
/// list in snapshot order; there is no diffing and no local additions.
#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster with `users`, marking the entry whose name equals
    /// `local_username` as the local user. The relay owns name uniqueness;
    /// if it ever sends duplicates, every match is marked.
    pub fn replace(&mut self, users: Vec<WireUser>, local_username: &str) {
        self.entries = users
            .into_iter()
            .map(|u| RosterEntry {
                is_self: u.username == local_username,
                sid: u.sid,
                username: u.username,
            })
            .collect();
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
