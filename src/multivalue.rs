//src/multivalue.rs

use std::fmt;

/// Reserved separator between the values of a multi-valued field.
pub const DELIMITER: char = '*';

/// Zero or more values stored as one `*`-joined string.
/// The empty string means "no value", so a lone empty value does not survive
/// a write and read back; empty values after the first keep their slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValue {
    joined: String,
    len: usize,
}

impl MultiValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a field read back from a delimited file.
    pub fn from_joined(joined: &str) -> Self {
        Self {
            joined: joined.to_string(),
            len: split(joined).count(),
        }
    }

    /// Append one value: the first one goes in bare, later ones behind the delimiter.
    pub fn push(&mut self, value: &str) {
        if self.len > 0 {
            self.joined.push(DELIMITER);
        }
        self.joined.push_str(value);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        &self.joined
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        split(&self.joined)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values().any(|v| v == value)
    }
}

impl fmt::Display for MultiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined)
    }
}

impl<'a> FromIterator<&'a str> for MultiValue {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut mv = MultiValue::new();
        for value in iter {
            mv.push(value);
        }
        mv
    }
}

/// Split a joined field. An empty field yields nothing rather than one empty value.
pub fn split(joined: &str) -> impl Iterator<Item = &str> {
    joined
        .split(DELIMITER)
        .filter(move |_| !joined.is_empty())
}

pub fn join<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| v.as_ref())
        .collect::<MultiValue>()
        .joined
}
