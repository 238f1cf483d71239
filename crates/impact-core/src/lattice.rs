//! Name lookup over an ordered lattice.
//!
//! Names are not required to be unique. The index keeps every position for
//! a name; [`ElementIndex::get`] resolves duplicates to the LAST element
//! with that name in lattice order, and [`ElementIndex::get_all`] returns
//! all of them.

use std::collections::BTreeMap;

use crate::element::Element;

#[derive(Debug, Clone, Default)]
pub struct ElementIndex {
    by_name: BTreeMap<String, Vec<usize>>,
}

impl ElementIndex {
    /// Builds the index. Comments are skipped.
    pub fn build(lattice: &[Element]) -> Self {
        let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (pos, element) in lattice.iter().enumerate() {
            if element.is_comment() {
                continue;
            }
            by_name.entry(element.name.clone()).or_default().push(pos);
        }
        Self { by_name }
    }

    /// Position of the last element named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).and_then(|v| v.last().copied())
    }

    pub fn get<'a>(&self, lattice: &'a [Element], name: &str) -> Option<&'a Element> {
        self.position(name).and_then(|pos| lattice.get(pos))
    }

    pub fn get_mut<'a>(&self, lattice: &'a mut [Element], name: &str) -> Option<&'a mut Element> {
        self.position(name).and_then(move |pos| lattice.get_mut(pos))
    }

    pub fn get_all<'a>(&self, lattice: &'a [Element], name: &str) -> Vec<&'a Element> {
        self.by_name
            .get(name)
            .map(|positions| positions.iter().filter_map(|p| lattice.get(*p)).collect())
            .unwrap_or_default()
    }

    /// Names that occur more than once.
    pub fn duplicates(&self) -> Vec<&str> {
        self.by_name
            .iter()
            .filter(|(_, v)| v.len() > 1)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
