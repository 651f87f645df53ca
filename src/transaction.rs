//! Applying a patch to a resource container.

use std::path::Path;

use log::{debug, info, warn};

use crate::{errors::*, patch::*, store::*};


/// Update session that is aborted unless committed.
pub struct Transaction<U: ResourceUpdate> {
    update: Option<U>,
}

impl<U: ResourceUpdate> Transaction<U> {
    /// Begin an update of the container at `path`.
    pub fn begin<S: ResourceStore<Update = U> + ?Sized>(store: &S, path: &Path) -> Result<Self, SyncError> {
        Ok(Self {
            update: Some(store.begin_update(path)?),
        })
    }

    /// Stage a single operation.
    pub fn stage(&mut self, operation: &Operation) -> Result<(), SyncError> {
        match self.update.as_mut() {
            Some(update) => update.stage(&operation.key, operation.payload.as_deref()),
            None => unreachable!("transaction used after commit"),
        }
    }

    /// Commit all staged operations.
    pub fn commit(mut self) -> Result<(), SyncError> {
        match self.update.take() {
            Some(update) => update.commit(),
            None => unreachable!("transaction committed twice"),
        }
    }
}

impl<U: ResourceUpdate> Drop for Transaction<U> {
    fn drop(&mut self) {
        if let Some(update) = self.update.take() {
            warn!("aborting resource update");
            update.abort();
        }
    }
}

/// Apply a patch to the container at `path` in a single transaction.
///
/// Every operation is staged before anything is committed. If staging any operation fails the transaction is aborted
/// and the container stays unchanged. A failed commit is returned as is, without retrying.
/// An empty patch does not open the container for updating.
pub fn apply<S: ResourceStore + ?Sized>(store: &S, path: &Path, patch: &Patch) -> Result<(), SyncError> {
    if patch.is_empty() {
        debug!("nothing to update in {:?}", path);
        return Ok(());
    }

    let mut transaction = Transaction::begin(store, path)?;
    for operation in patch {
        debug!("staging {}", operation);
        transaction.stage(operation)?;
    }
    transaction.commit()?;
    info!("updated {:?}: {} writes, {} deletes", path, patch.writes(), patch.deletes());
    Ok(())
}
