//! Colon-joined KV key builder
//!
//! A key is a list of atoms joined by `:`. Appending a segment that itself
//! contains colons splits it into atoms first, so atoms are always
//! colon-free and a key's segment count is well defined.

use std::fmt;

/// A KV key under construction; cheap to clone and extend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// Start a key from its first segment
    pub fn root(segment: impl AsRef<str>) -> Self {
        Key(String::new()).at(segment)
    }

    /// Append a segment, splitting it into colon-free atoms first
    pub fn at(mut self, segment: impl AsRef<str>) -> Self {
        for atom in segment.as_ref().split(':').filter(|a| !a.is_empty()) {
            if !self.0.is_empty() {
                self.0.push(':');
            }
            self.0.push_str(atom);
        }
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Key> for String {
    fn from(key: Key) -> String {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_segments_with_colons() {
        let key = Key::root("traffic").at("T1").at("conf");
        assert_eq!(key.as_str(), "traffic:T1:conf");
    }

    #[test]
    fn splits_segments_containing_colons() {
        let key = Key::root("working").at("a:b:c");
        assert_eq!(key.as_str(), "working:a:b:c");

        let same = Key::root("working").at("a").at("b").at("c");
        assert_eq!(key, same);
    }

    #[test]
    fn drops_empty_atoms() {
        let key = Key::root("port").at(":server::10042:");
        assert_eq!(key.as_str(), "port:server:10042");
    }

    #[test]
    fn single_segment_key() {
        assert_eq!(Key::root("token").as_str(), "token");
    }
}
