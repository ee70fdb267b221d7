//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Rcconf.
//
// Rcconf is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Rcconf is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Rcconf. If not, see <http://www.gnu.org/licenses/>.

//! The value model of configuration documents.
//!
//! Documents are written as PHP arrays, so the model is that of PHP values
//! restricted to what can appear in a literal: scalars, bare constants, and
//! ordered arrays whose keys are either integers or strings. A "list" is just
//! an array whose keys are `0..n` in order.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// A bare constant such as `LOG_MAIL`, kept by name.
    Const(String),
    Array(Array),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
}

/// An ordered array.
///
/// Assigning to an existing key replaces the value in place, so the key keeps
/// its original position. Appending without a key uses one more than the
/// greatest integer key so far, or 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Array {
    entries: Vec<(Key, Value)>,
}

impl Value {
    #[cfg(test)]
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::Str(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match *self {
            Value::Array(ref a) => Some(a),
            _ => None,
        }
    }

    /// A short description of the kind of value, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match *self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Const(_) => "constant",
            Value::Array(ref a) if a.is_list() => "list",
            Value::Array(_) => "map",
        }
    }

    /// Whether this value is "empty" in the sense a PHP `empty()` check would
    /// treat it, except that constants are never empty.
    pub fn is_empty(&self) -> bool {
        match *self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(i) => 0 == i,
            Value::Str(ref s) => s.is_empty(),
            Value::Const(_) => false,
            Value::Array(ref a) => a.is_empty(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_owned())
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(ref s) => write!(f, "{}", s),
        }
    }
}

/// Compact single-line form, used when reporting values to the user.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(ref s) => write!(f, "{:?}", s),
            Value::Const(ref c) => write!(f, "{}", c),
            Value::Array(ref a) if a.is_list() => {
                write!(f, "[")?;
                for (ix, (_, v)) in a.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Array(ref a) => {
                write!(f, "{{")?;
                for (ix, (k, v)) in a.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().map(|&(ref k, ref v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|&(ref k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|&(_, ref v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|&&(ref k, _)| matches!(*k, Key::Str(ref s) if s == key))
            .map(|&(_, ref v)| v)
    }

    pub fn get_key(&self, key: &Key) -> Option<&Value> {
        self.entries
            .iter()
            .find(|&&(ref k, _)| k == key)
            .map(|&(_, ref v)| v)
    }

    /// Set `key` to `value`, returning the previous value if there was one.
    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        if let Some(slot) = self.entries.iter_mut().find(|slot| slot.0 == key)
        {
            return Some(std::mem::replace(&mut slot.1, value));
        }

        self.entries.push((key, value));
        None
    }

    /// Append `value` under the next free integer key.
    ///
    /// If the largest integer key is already `i64::MAX`, there is no next
    /// key, and `value` is handed back.
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        let next = match self
            .entries
            .iter()
            .filter_map(|&(ref k, _)| match *k {
                Key::Int(i) => Some(i),
                Key::Str(_) => None,
            })
            .max()
        {
            None => 0,
            Some(max) => match max.checked_add(1) {
                Some(next) => next,
                None => return Err(value),
            },
        };
        self.entries.push((Key::Int(next), value));
        Ok(())
    }

    /// Whether the keys are exactly `0..len` in order.
    pub fn is_list(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(ix, &(ref k, _))| *k == Key::Int(ix as i64))
    }
}

impl std::iter::FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(it: I) -> Self {
        Array {
            entries: it
                .into_iter()
                .enumerate()
                .map(|(ix, v)| (Key::Int(ix as i64), v))
                .collect(),
        }
    }
}

impl std::iter::FromIterator<(Key, Value)> for Array {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(it: I) -> Self {
        let mut array = Array::new();
        for (k, v) in it {
            array.insert(k, v);
        }
        array
    }
}

impl IntoIterator for Array {
    type Item = (Key, Value);
    type IntoIter = std::vec::IntoIter<(Key, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_keeps_position() {
        let mut a = Array::new();
        assert_eq!(None, a.insert("x".into(), Value::Int(1)));
        assert_eq!(None, a.insert("y".into(), Value::Int(2)));
        assert_eq!(
            Some(Value::Int(1)),
            a.insert("x".into(), Value::Int(3))
        );

        let keys = a.keys().cloned().collect::<Vec<_>>();
        assert_eq!(vec![Key::from("x"), Key::from("y")], keys);
        assert_eq!(Some(&Value::Int(3)), a.get("x"));
    }

    #[test]
    fn push_uses_next_integer_key() {
        let mut a = Array::new();
        a.push("a".into()).unwrap();
        a.insert(Key::Int(7), "b".into());
        a.insert("s".into(), "c".into());
        a.push("d".into()).unwrap();

        assert_eq!(Some(&Value::str("d")), a.get_key(&Key::Int(8)));
        assert!(!a.is_list());

        let mut full = Array::new();
        full.insert(Key::Int(i64::MAX), "x".into());
        assert_eq!(Err(Value::str("y")), full.push("y".into()));
        assert_eq!(1, full.len());

        let list = vec![Value::str("a"), Value::str("b")]
            .into_iter()
            .collect::<Array>();
        assert!(list.is_list());
        assert_eq!("[\"a\", \"b\"]", Value::Array(list).to_string());
    }

    #[test]
    fn kind_names() {
        assert_eq!("list", Value::Array(Array::new()).kind_name());
        let mut map = Array::new();
        map.insert("k".into(), Value::Null);
        assert_eq!("map", Value::Array(map).kind_name());
        assert_eq!("constant", Value::Const("LOG_MAIL".to_owned()).kind_name());
    }
}
