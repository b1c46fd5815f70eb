//! Path parameter bindings produced by a successful match.

/// Name → value bindings captured from the request path.
///
/// Kept as a small ordered vector: routes rarely bind more than a handful of
/// parameters, and pattern order is the natural iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    bindings: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, replacing an earlier binding of the same name.
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.bindings.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.bindings.push((name, value)),
        }
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterates bindings in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_name() {
        let mut p = Params::new();
        p.insert("id", "1");
        p.insert("id", "2");
        assert_eq!(p.get("id"), Some("2"));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut p = Params::new();
        p.insert("user", "7");
        p.insert("post", "99");
        let pairs: Vec<_> = p.iter().collect();
        assert_eq!(pairs, vec![("user", "7"), ("post", "99")]);
    }
}
