use thiserror::Error;
pub mod decoder;
pub mod encoder;

/// An ordered mapping from byte-string keys to `BencodeValue`s.
///
/// Backed by a `Vec` of pairs rather than a `HashMap`: re-encoding an
/// `info` dictionary must reproduce the exact bytes seen on decode, which a
/// hash map's arbitrary iteration order cannot guarantee. `torrent::info_hash`
/// depends on this.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct BencodeDict(pub Vec<(Vec<u8>, BencodeValue)>);

impl BencodeDict {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Removes and returns the value for `key`, preserving the order of the
    /// remaining entries.
    pub fn remove(&mut self, key: &[u8]) -> Option<BencodeValue> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    /// Inserts `value`, overwriting in place if `key` is already present so
    /// first-seen order is kept.
    pub fn insert(&mut self, key: Vec<u8>, value: BencodeValue) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Vec<u8>, BencodeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/**
 * A decoded Bencode value.
 *
 * Four variants, matching the wire grammar exactly:
 *
 * 1. `String(Vec<u8>)` — a raw byte string, e.g. `4:spam` -> `String(b"spam")`.
 * 2. `Integer(i64)` — e.g. `i42e` -> `Integer(42)`.
 * 3. `List(Vec<BencodeValue>)` — e.g. `l4:spami42ee` -> `List([String(b"spam"), Integer(42)])`.
 * 4. `Dict(BencodeDict)` — an order-preserving string-keyed map, e.g.
 *    `d3:foo3:bare` -> `Dict({b"foo" => String(b"bar")})`.
 */
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BencodeDict),
}

impl BencodeValue {
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BencodeDict> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Custom error type for Bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bencode input: {0}")]
    MalformedInput(String),

    #[error("invalid integer format")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("expected a byte input")]
    TypeError,

    #[error("dictionary value encoded to nothing")]
    BadDictionary,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
