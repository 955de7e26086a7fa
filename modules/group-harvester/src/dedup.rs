use std::collections::HashSet;

/// Texts already captured by this or any earlier run.
///
/// Keys are whitespace-trimmed and compared exactly. The index only grows:
/// there is no removal.
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    texts: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from texts read back out of the record store.
    pub fn from_persisted<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::new();
        index.extend(texts);
        index
    }

    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text.trim())
    }

    /// Returns true when the text was not already present. Blank text is ignored.
    pub fn insert(&mut self, text: &str) -> bool {
        let key = text.trim();
        if key.is_empty() {
            return false;
        }
        self.texts.insert(key.to_string())
    }

    pub fn extend<I, S>(&mut self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for text in texts {
            self.insert(text.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_trimmed_but_case_sensitive() {
        let index = DedupIndex::from_persisted(["  Registrar deadline extended\n"]);
        assert!(index.contains("Registrar deadline extended"));
        assert!(index.contains("\tRegistrar deadline extended "));
        assert!(!index.contains("registrar deadline extended"));
    }

    #[test]
    fn blank_texts_are_never_indexed() {
        let mut index = DedupIndex::new();
        assert!(!index.insert("   "));
        assert!(index.is_empty());
    }

    #[test]
    fn reinserting_does_not_grow() {
        let mut index = DedupIndex::new();
        assert!(index.insert("Clearance forms due"));
        assert!(!index.insert(" Clearance forms due "));
        assert_eq!(index.len(), 1);
    }
}
