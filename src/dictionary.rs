/// Symbol dictionary
///
/// Bidirectional mapping between symbols (usually single characters) and
/// stable integer indices. Symbols keep the index they were added with.
use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Index returned by [`Dictionary::index_of`] for symbols that were never
/// added. Lookups never fail: unknown characters collapse onto this slot.
pub const UNKNOWN_INDEX: usize = 0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DictionaryRecord", into = "DictionaryRecord")]
pub struct Dictionary {
    items: Vec<String>,
    index: HashMap<String, usize>,
}

/// Persisted form: the symbols in index order
#[derive(Clone, Serialize, Deserialize)]
struct DictionaryRecord {
    items: Vec<String>,
}

impl From<DictionaryRecord> for Dictionary {
    fn from(record: DictionaryRecord) -> Self {
        Self::from_symbols(record.items)
    }
}

impl From<Dictionary> for DictionaryRecord {
    fn from(dictionary: Dictionary) -> Self {
        Self { items: dictionary.items }
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from symbols in order; repeated symbols keep their first index
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dictionary = Self::new();
        for symbol in symbols {
            dictionary.add_item(symbol);
        }
        dictionary
    }

    /// Character dictionary holding every distinct character of `text`
    /// in order of first appearance
    pub fn from_text(text: &str) -> Self {
        Self::from_symbols(text.chars().map(String::from))
    }

    /// Add a symbol, returning its index
    pub fn add_item<S: Into<String>>(&mut self, symbol: S) -> usize {
        let symbol = symbol.into();
        if let Some(&idx) = self.index.get(&symbol) {
            return idx;
        }
        let idx = self.items.len();
        self.index.insert(symbol.clone(), idx);
        self.items.push(symbol);
        idx
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of `symbol`, or [`UNKNOWN_INDEX`] when it is absent
    pub fn index_of(&self, symbol: &str) -> usize {
        self.index.get(symbol).copied().unwrap_or(UNKNOWN_INDEX)
    }

    pub fn index_of_char(&self, c: char) -> usize {
        let mut buf = [0u8; 4];
        self.index_of(c.encode_utf8(&mut buf))
    }

    pub fn symbol_at(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    pub fn symbols(&self) -> &[String] {
        &self.items
    }
}
