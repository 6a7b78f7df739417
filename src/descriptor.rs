use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Distinct annotation type descriptors (`Ljavax/inject/Inject;`).
///
/// Backed by an ordered set, so iteration and output are sorted and two scans
/// of the same bytes compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorSet {
    descriptors: BTreeSet<String>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: impl Into<String>) -> bool {
        self.descriptors.insert(descriptor.into())
    }

    pub fn contains(&self, descriptor: &str) -> bool {
        self.descriptors.contains(descriptor)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(String::as_str)
    }

    pub fn absorb(&mut self, other: DescriptorSet) {
        if self.descriptors.len() < other.descriptors.len() {
            let mut larger = other.descriptors;
            larger.append(&mut self.descriptors);
            self.descriptors = larger;
        } else {
            self.descriptors.extend(other.descriptors);
        }
    }

    /// Set union; commutative, associative and idempotent, so partial results
    /// can be merged in any completion order.
    pub fn merge(mut self, other: DescriptorSet) -> DescriptorSet {
        self.absorb(other);
        self
    }
}

impl<S: Into<String>> FromIterator<S> for DescriptorSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            descriptors: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for DescriptorSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.descriptors.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for DescriptorSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.into_iter()
    }
}
