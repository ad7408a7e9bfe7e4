//! Display alphabet: the fixed, ordered set of symbols printed on the flaps.
//!
//! Flap index `i` is the `i`-th symbol of the alphabet. Lookup is an exact
//! byte match; the controller never normalises case.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default 40-flap symbol set.
pub const DEFAULT_ALPHABET: &str = " ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789.,'";

/// Ordered set of unique ASCII symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    symbols: Vec<u8>,
}

impl Alphabet {
    /// Build an alphabet, rejecting empty, non-ASCII or duplicated symbol sets.
    pub fn new(symbols: &str) -> Result<Self, ConfigError> {
        if symbols.is_empty() {
            return Err(ConfigError::ValidationError(
                "alphabet cannot be empty".to_string(),
            ));
        }
        if !symbols.is_ascii() {
            return Err(ConfigError::ValidationError(format!(
                "alphabet must be ASCII: {symbols:?}"
            )));
        }
        let bytes = symbols.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if bytes[..i].contains(b) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate alphabet symbol {:?}",
                    *b as char
                )));
            }
        }
        Ok(Self {
            symbols: bytes.to_vec(),
        })
    }

    /// Number of flaps per module.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false for a validated alphabet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Flap index for a received byte, or `None` if it is not on the flaps.
    pub fn find(&self, symbol: u8) -> Option<usize> {
        self.symbols.iter().position(|&s| s == symbol)
    }

    /// Symbol printed on flap `index`.
    pub fn symbol(&self, index: usize) -> Option<char> {
        self.symbols.get(index).map(|&b| b as char)
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_ALPHABET.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<String> for Alphabet {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Alphabet> for String {
    fn from(value: Alphabet) -> Self {
        // Validated as ASCII on construction.
        value.symbols.iter().map(|&b| b as char).collect()
    }
}
