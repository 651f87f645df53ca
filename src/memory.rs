//! In-memory resource containers.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    rc::Rc,
};

use log::debug;

use crate::{constants::*, errors::*, key::*, store::*};

type Container = BTreeMap<ResourceKey, Vec<u8>>;

/// Resource store keeping containers in memory, keyed by path.
///
/// Clones share the same containers, so a clone can be handed to a synchronizer while the original is inspected.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    containers: Rc<RefCell<HashMap<PathBuf, Container>>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Create or replace a container.
    pub fn insert_container<P: Into<PathBuf>, I: IntoIterator<Item = (ResourceKey, Vec<u8>)>>(
        &self, path: P, resources: I,
    ) {
        self.containers.borrow_mut().insert(path.into(), resources.into_iter().collect());
    }

    /// Returns a copy of the resources of a container, or `None` if it does not exist.
    pub fn container<P: AsRef<Path>>(&self, path: P) -> Option<Vec<(ResourceKey, Vec<u8>)>> {
        self.containers
            .borrow()
            .get(path.as_ref())
            .map(|container| container.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn open(&self, path: &Path, access: Access) -> Result<Container, SyncError> {
        self.containers.borrow().get(path).cloned().ok_or_else(|| SyncError::Open {
            path: path.to_path_buf(),
            access,
            reason: "no such container".to_string(),
        })
    }
}

impl ResourceStore for MemoryStore {
    type Reader = MemoryReader;
    type Update = MemoryUpdate;

    fn open_for_read(&self, path: &Path) -> Result<MemoryReader, SyncError> {
        Ok(MemoryReader {
            container: self.open(path, Access::Read)?,
        })
    }

    fn begin_update(&self, path: &Path) -> Result<MemoryUpdate, SyncError> {
        Ok(MemoryUpdate {
            containers: self.containers.clone(),
            path:       path.to_path_buf(),
            staged:     self.open(path, Access::Update)?,
        })
    }
}

/// Reader over a copy of an in-memory container.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    container: Container,
}

impl ResourceReader for MemoryReader {
    fn names(&self, kind: &Identifier) -> Result<Vec<Identifier>, SyncError> {
        let mut names = Vec::<Identifier>::new();
        for key in self.container.keys().filter(|key| &key.kind == kind) {
            if names.last() != Some(&key.name) {
                names.push(key.name.clone());
            }
        }
        Ok(names)
    }

    fn languages(&self, kind: &Identifier, name: &Identifier) -> Result<Vec<LANGID>, SyncError> {
        Ok(self
            .container
            .keys()
            .filter(|key| &key.kind == kind && &key.name == name)
            .map(|key| key.language)
            .collect())
    }

    fn extract(&self, key: &ResourceKey) -> Result<Vec<u8>, SyncError> {
        self.container.get(key).cloned().ok_or_else(|| SyncError::NotFound(key.clone()))
    }
}

/// Update session of an in-memory container.
#[derive(Debug)]
pub struct MemoryUpdate {
    containers: Rc<RefCell<HashMap<PathBuf, Container>>>,
    path:       PathBuf,
    staged:     Container,
}

impl ResourceUpdate for MemoryUpdate {
    fn stage(&mut self, key: &ResourceKey, payload: Option<&[u8]>) -> Result<(), SyncError> {
        match payload {
            Some(payload) => {
                key.check().map_err(|error| SyncError::Update {
                    key:    key.clone(),
                    reason: error.to_string(),
                })?;
                self.staged.insert(key.clone(), payload.to_vec());
            }
            None => {
                self.staged.remove(key).ok_or_else(|| SyncError::Update {
                    key:    key.clone(),
                    reason: ResourceError::Missing(key.clone()).to_string(),
                })?;
            }
        }
        Ok(())
    }

    fn commit(self) -> Result<(), SyncError> {
        self.containers.borrow_mut().insert(self.path, self.staged);
        Ok(())
    }

    fn abort(self) {
        debug!("discarding staged updates to {:?}", self.path);
    }
}
