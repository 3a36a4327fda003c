/// Ordered name/value store for the header block of a client request.
///
/// Names keep exactly the case the client sent, and lookups match
/// case-sensitively. Re-inserting a name overwrites the stored value in
/// place, so a request that repeats a header ends up with one entry for
/// it, holding the last value seen.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<(String, String)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a header, replacing the value of an existing entry with the
    /// same name. Insertion order of first appearance is preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Exact-case lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
