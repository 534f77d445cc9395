//! Field-state snapshots.
//!
//! A [`StateSnapshot`] is the unit of state transfer: an ordered list of
//! field-name/value pairs produced by an object's introspection and applied
//! on the receiving side. Values are opaque; nothing here looks inside them.

use serde::Deserialize;
use serde::Serialize;

use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    fields: Vec<(String, Value)>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a field, replacing a previous entry with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value.into();
        } else {
            self.fields.push((name, value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keeps only the named fields, preserving this snapshot's order.
    /// Names with no matching field are ignored.
    pub fn subset(&self, names: &[&str]) -> StateSnapshot {
        StateSnapshot {
            fields: self
                .fields
                .iter()
                .filter(|(n, _)| names.contains(&n.as_str()))
                .cloned()
                .collect(),
        }
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut snap = StateSnapshot::new();
        for (n, v) in iter {
            snap.set(n, v);
        }
        snap
    }
}
