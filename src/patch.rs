//! Computing the changes that align one snapshot with another.

use std::{fmt, slice};

use log::debug;

use crate::{key::*, snapshot::*};


/// A single change to a resource container: write the payload, or delete the resource if there is none.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Operation {
    pub key:     ResourceKey,
    pub payload: Option<Vec<u8>>,
}
impl Operation {
    pub fn write(key: ResourceKey, payload: Vec<u8>) -> Self {
        Self {
            key,
            payload: Some(payload),
        }
    }

    pub fn delete(key: ResourceKey) -> Self { Self { key, payload: None } }

    pub fn is_delete(&self) -> bool { self.payload.is_none() }
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{}: {}", self.key, preview(payload)),
            None => write!(f, "{}: None", self.key),
        }
    }
}

/// Ordered list of operations, sorted by key.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Patch {
    operations: Vec<Operation>,
}
impl Patch {
    /// Create a patch from operations in any order.
    pub fn new(mut operations: Vec<Operation>) -> Self {
        operations.sort_by(|a, b| a.key.cmp(&b.key));
        Self { operations }
    }

    pub fn operations(&self) -> &[Operation] { &self.operations }

    pub fn iter(&self) -> slice::Iter<'_, Operation> { self.operations.iter() }

    pub fn len(&self) -> usize { self.operations.len() }

    pub fn is_empty(&self) -> bool { self.operations.is_empty() }

    /// Returns the number of write operations.
    pub fn writes(&self) -> usize { self.operations.iter().filter(|op| !op.is_delete()).count() }

    /// Returns the number of delete operations.
    pub fn deletes(&self) -> usize { self.operations.iter().filter(|op| op.is_delete()).count() }
}
impl<'a> IntoIterator for &'a Patch {
    type IntoIter = slice::Iter<'a, Operation>;
    type Item = &'a Operation;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Outcome of comparing a source with a destination snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct SyncPlan {
    /// Changes to apply to the destination.
    pub patch:     Patch,
    /// Keys present in both snapshots with equal data, sorted.
    pub identical: Vec<ResourceKey>,
    /// Keys only present in the destination, sorted. These are deleted by the patch if extra resources are removed.
    pub extra:     Vec<ResourceKey>,
}

/// Compute the patch that aligns the destination with the source.
///
/// Every source resource missing from the destination or differing from it is written.
/// Resources only present in the destination are deleted if `remove_extra` is set and left untouched otherwise.
pub fn diff(source: &Snapshot, destination: &Snapshot, remove_extra: bool) -> SyncPlan {
    let mut operations = Vec::new();
    let mut identical = Vec::new();
    for (key, data) in source.iter() {
        match destination.get(key) {
            Some(existing) if existing == data => identical.push(key.clone()),
            _ => operations.push(Operation::write(key.clone(), data.to_vec())),
        }
    }

    let mut extra =
        destination.keys().filter(|key| !source.contains_key(key)).cloned().collect::<Vec<_>>();
    extra.sort();
    identical.sort();
    if remove_extra {
        operations.extend(extra.iter().cloned().map(Operation::delete));
    }

    let plan = SyncPlan {
        patch: Patch::new(operations),
        identical,
        extra,
    };
    debug!(
        "{} writes, {} deletes, {} identical, {} extra",
        plan.patch.writes(),
        plan.patch.deletes(),
        plan.identical.len(),
        plan.extra.len()
    );
    plan
}

/// Render the first 20 bytes and the size of a payload.
pub fn preview(data: &[u8]) -> String {
    let head = data.iter().take(20).flat_map(|&c| std::ascii::escape_default(c)).map(char::from);
    let ellipsis = if data.len() > 20 { "..." } else { "" };
    format!("b\"{}\"{} ({} bytes)", head.collect::<String>(), ellipsis, data.len())
}
