//! Resource snapshots.
//!
//! A [`Snapshot`] holds every resource of a set of types in one container, keyed by type, name and language.

use ahash::RandomState;
use indexmap::{map::Entry, IndexMap};
use log::{debug, trace};

use crate::{errors::*, key::*, store::*};


/// Complete mapping of resource keys to their data for one container.
///
/// Entries keep enumeration order, which carries no meaning: two snapshots are equal if they contain the same keys with the same data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Snapshot {
    resources: IndexMap<ResourceKey, Vec<u8>, RandomState>,
}

impl Snapshot {
    pub fn new() -> Self { Self::default() }

    /// Build a snapshot of all resources of the given types.
    ///
    /// Types are walked in the given order, then every name of a type and every language of a name.
    ///
    /// # Returns
    /// Returns an error if any enumeration or extraction fails, or if the reader reports a key twice.
    /// Partial snapshots are never returned.
    pub fn build<R: ResourceReader + ?Sized>(
        reader: &R, types: &[Identifier],
    ) -> Result<Self, SyncError> {
        let mut snapshot = Self::new();
        for kind in types {
            let names = reader.names(kind)?;
            trace!("type {}: {} names", kind, names.len());
            for name in names {
                for language in reader.languages(kind, &name)? {
                    let key = ResourceKey::new(kind.clone(), name.clone(), language);
                    let data = reader.extract(&key)?;
                    trace!("{}: {} bytes", key, data.len());
                    snapshot.insert(key, data)?;
                }
            }
        }
        debug!("built snapshot of {} resources", snapshot.len());
        Ok(snapshot)
    }

    /// Insert a resource.
    ///
    /// # Returns
    /// Returns an error if the key is already present; existing data is never overwritten.
    pub fn insert(&mut self, key: ResourceKey, data: Vec<u8>) -> Result<(), SyncError> {
        match self.resources.entry(key) {
            Entry::Occupied(entry) => Err(SyncError::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(())
            }
        }
    }

    /// Returns the data of a resource.
    pub fn get(&self, key: &ResourceKey) -> Option<&[u8]> { self.resources.get(key).map(Vec::as_slice) }

    /// Returns whether the snapshot contains a resource.
    pub fn contains_key(&self, key: &ResourceKey) -> bool { self.resources.contains_key(key) }

    /// Returns the keys in enumeration order.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> { self.resources.keys() }

    /// Returns the resources in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &[u8])> {
        self.resources.iter().map(|(key, data)| (key, data.as_slice()))
    }

    pub fn len(&self) -> usize { self.resources.len() }

    pub fn is_empty(&self) -> bool { self.resources.is_empty() }
}

impl TryFrom<Vec<(ResourceKey, Vec<u8>)>> for Snapshot {
    type Error = SyncError;

    /// Collect resources into a snapshot, failing on the first duplicate key.
    fn try_from(resources: Vec<(ResourceKey, Vec<u8>)>) -> Result<Self, Self::Error> {
        let mut snapshot = Self::new();
        for (key, data) in resources {
            snapshot.insert(key, data)?;
        }
        Ok(snapshot)
    }
}
