use serde::{Deserialize, Serialize};

/// Ordered, duplicate-free roster of profile `app_id`s.
///
/// Insertion order is preserved (the first entry of a team roster is usually
/// its founder), inserts are idempotent and `replace` keeps the position of
/// the replaced entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct MemberSet(Vec<String>);

impl MemberSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append `app_id` unless it is already present. Returns `true` if added.
    pub fn insert(&mut self, app_id: impl Into<String>) -> bool {
        let app_id = app_id.into();
        if self.contains(&app_id) {
            return false;
        }
        self.0.push(app_id);
        true
    }

    /// Returns `true` if `app_id` was present.
    pub fn remove(&mut self, app_id: &str) -> bool {
        match self.position(app_id) {
            Some(idx) => {
                self.0.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Replace `old` with `new` in place.
    ///
    /// If `new` is already a member the old entry is dropped instead, so the
    /// set never ends up with two copies. Returns `true` if `old` was present.
    pub fn replace(&mut self, old: &str, new: &str) -> bool {
        let Some(idx) = self.position(old) else {
            return false;
        };
        if old == new {
            return true;
        }
        if self.contains(new) {
            self.0.remove(idx);
        } else {
            self.0[idx] = new.to_string();
        }
        true
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.0.iter().any(|m| m == app_id)
    }

    pub fn position(&self, app_id: &str) -> Option<usize> {
        self.0.iter().position(|m| m == app_id)
    }

    /// Set equality, ignoring order.
    pub fn same_members(&self, other: &MemberSet) -> bool {
        self.len() == other.len() && self.0.iter().all(|m| other.contains(m))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for MemberSet {
    fn from(ids: Vec<String>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<MemberSet> for Vec<String> {
    fn from(set: MemberSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for MemberSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MemberSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = MemberSet::new();
        assert!(set.insert("alice"));
        assert!(set.insert("bob"));
        assert!(!set.insert("alice"));
        assert_eq!(set.as_slice(), ["alice", "bob"]);
    }

    #[test]
    fn replace_keeps_position() {
        let mut set: MemberSet = ["alice", "bob", "carol"].into_iter().collect();
        assert!(set.replace("bob", "robert"));
        assert_eq!(set.as_slice(), ["alice", "robert", "carol"]);
        assert!(!set.replace("nobody", "x"));
    }

    #[test]
    fn replace_onto_existing_member_dedups() {
        let mut set: MemberSet = ["alice", "bob", "carol"].into_iter().collect();
        assert!(set.replace("alice", "carol"));
        assert_eq!(set.as_slice(), ["bob", "carol"]);
    }

    #[test]
    fn set_equality_ignores_order() {
        let a: MemberSet = ["alice", "bob"].into_iter().collect();
        let b: MemberSet = ["bob", "alice"].into_iter().collect();
        let c: MemberSet = ["bob"].into_iter().collect();
        assert!(a.same_members(&b));
        assert!(!a.same_members(&c));
    }

    #[test]
    fn deserialize_drops_duplicates() {
        let set: MemberSet = serde_json::from_str(r#"["a","b","a"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["a","b"]"#);
    }
}
