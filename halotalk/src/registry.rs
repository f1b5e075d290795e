use std::collections::HashMap;

pub type ConnectionId = u64;

/// Map from live connection id to the display name it joined with.
///
/// The registry itself is not synchronized; [`crate::hub::Hub`] owns it behind
/// a single mutex so every read-modify-write happens one at a time.
#[derive(Debug, Default)]
pub struct Registry {
    names: HashMap<ConnectionId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the name for `id`, returning the name it replaced.
    pub fn record(&mut self, id: ConnectionId, name: String) -> Option<String> {
        self.names.insert(id, name)
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Removes `id` and returns the name it held. `None` when it never joined
    /// or was already removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<String> {
        self.names.remove(&id)
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.values().cloned().collect();
        names.sort();
        names
    }
}
