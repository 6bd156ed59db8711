//! Item payloads.

use serde::Serialize;

/// A primitive value stored in arrays and maps. Serializes as plain JSON;
/// non-finite floats become `null`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Payload of an item. Lengths are counted in elements: chars for text,
/// values for `Any`.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    String(String),
    Any(Vec<Value>),
    /// Tombstone that only remembers how many elements it covered.
    Deleted(u64),
}

impl Content {
    pub const REF_DELETED: u8 = 1;
    pub const REF_STRING: u8 = 4;
    pub const REF_ANY: u8 = 8;

    pub fn len(&self) -> u64 {
        match self {
            Content::String(s) => s.chars().count() as u64,
            Content::Any(values) => values.len() as u64,
            Content::Deleted(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Countable content contributes to the visible length of its parent.
    pub fn is_countable(&self) -> bool {
        !matches!(self, Content::Deleted(_))
    }

    pub fn type_ref(&self) -> u8 {
        match self {
            Content::String(_) => Self::REF_STRING,
            Content::Any(_) => Self::REF_ANY,
            Content::Deleted(_) => Self::REF_DELETED,
        }
    }

    /// Keep the first `offset` elements and return the rest.
    pub fn split_off(&mut self, offset: u64) -> Content {
        match self {
            Content::String(s) => Content::String(s.split_off(char_to_byte(s, offset))),
            Content::Any(values) => {
                let at = (offset as usize).min(values.len());
                Content::Any(values.split_off(at))
            }
            Content::Deleted(len) => {
                let rest = len.saturating_sub(offset);
                *len -= rest;
                Content::Deleted(rest)
            }
        }
    }

    /// Append `other` when both payloads have the same kind.
    pub fn try_merge(&mut self, other: Content) -> Result<(), Content> {
        match (self, other) {
            (Content::String(a), Content::String(b)) => {
                a.push_str(&b);
                Ok(())
            }
            (Content::Any(a), Content::Any(b)) => {
                a.extend(b);
                Ok(())
            }
            (Content::Deleted(a), Content::Deleted(b)) => {
                *a += b;
                Ok(())
            }
            (_, other) => Err(other),
        }
    }

    pub fn is_mergeable_with(&self, other: &Content) -> bool {
        self.type_ref() == other.type_ref()
    }
}

/// Byte index of the `chars`-th char, or the string length past the end.
pub fn char_to_byte(s: &str, chars: u64) -> usize {
    s.char_indices()
        .nth(chars as usize)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_split_counts_chars() {
        let mut content = Content::String("héllo".into());
        let rest = content.split_off(2);
        assert_eq!(content, Content::String("hé".into()));
        assert_eq!(rest, Content::String("llo".into()));
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn test_any_split() {
        let mut content = Content::Any(vec![1.into(), 2.into(), 3.into()]);
        let rest = content.split_off(1);
        assert_eq!(content.len(), 1);
        assert_eq!(rest, Content::Any(vec![2.into(), 3.into()]));
    }

    #[test]
    fn test_deleted_split() {
        let mut content = Content::Deleted(5);
        let rest = content.split_off(2);
        assert_eq!(content, Content::Deleted(2));
        assert_eq!(rest, Content::Deleted(3));
    }

    #[test]
    fn test_merge_rejects_mismatched_kinds() {
        let mut content = Content::String("ab".into());
        assert!(content.try_merge(Content::Deleted(1)).is_err());
        assert!(content.try_merge(Content::String("c".into())).is_ok());
        assert_eq!(content, Content::String("abc".into()));
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(Value::from("x").to_json(), serde_json::json!("x"));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::from(Some(3)).to_json(), serde_json::json!(3));
        let values = [Value::Null, Value::Bool(true), Value::Int(-4), Value::Float(0.5)];
        let json: Vec<_> = values.iter().map(Value::to_json).collect();
        assert_eq!(json, vec![serde_json::json!(null), true.into(), (-4).into(), 0.5.into()]);
    }
}
