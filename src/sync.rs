//! Synchronizing resources from a source into a destination container.

use std::path::Path;

use log::{debug, info};

use crate::{constants::*, errors::*, key::*, patch::*, snapshot::*, store::*, transaction};


/// Options controlling which resources are synchronized and how.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyncOptions {
    /// Resource types to synchronize, in enumeration order.
    pub types:        Vec<Identifier>,
    /// Delete resources of the synchronized types that only exist in the destination.
    pub remove_extra: bool,
    /// Compute the patch without updating the destination.
    pub dry_run:      bool,
}
impl Default for SyncOptions {
    /// Icon groups and icons, keeping extra resources, updating the destination.
    fn default() -> Self {
        Self {
            types:        vec![RT_GROUP_ICON.into(), RT_ICON.into()],
            remove_extra: false,
            dry_run:      false,
        }
    }
}
impl SyncOptions {
    /// Returns the default options, additionally synchronizing version information if `include_version` is set.
    pub fn with_version(include_version: bool) -> Self {
        let mut options = Self::default();
        if include_version {
            options.types.push(RT_VERSION.into());
        }
        options
    }
}

/// Result of a synchronization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyncReport {
    pub source:      Snapshot,
    pub destination: Snapshot,
    pub plan:        SyncPlan,
    /// Whether the patch was committed to the destination.
    /// This is `false` for dry runs and when there was nothing to change.
    pub applied:     bool,
}

/// Synchronizes resources between containers of a [`ResourceStore`].
#[derive(Debug, Clone)]
pub struct Synchronizer<S> {
    store:   S,
    options: SyncOptions,
}

impl<S: ResourceStore> Synchronizer<S> {
    pub fn new(store: S, options: SyncOptions) -> Self { Self { store, options } }

    pub fn options(&self) -> &SyncOptions { &self.options }

    pub fn store(&self) -> &S { &self.store }

    /// Snapshot the synchronized resource types of a container.
    pub fn describe<P: AsRef<Path>>(&self, path: P) -> Result<Snapshot, SyncError> {
        let path = path.as_ref();
        let reader = self.store.open_for_read(path)?;
        let snapshot = Snapshot::build(&reader, &self.options.types)?;
        debug!("{:?}: {} resources", path, snapshot.len());
        Ok(snapshot)
    }

    /// Align the resources of the destination with the source.
    ///
    /// Both containers are snapshotted, source first. The destination is updated in a single transaction
    /// unless this is a dry run. The source is only ever read.
    pub fn synchronize<P: AsRef<Path>, Q: AsRef<Path>>(
        &self, source: P, destination: Q,
    ) -> Result<SyncReport, SyncError> {
        let destination = destination.as_ref();
        let source = self.describe(source)?;
        let target = self.describe(destination)?;

        let plan = diff(&source, &target, self.options.remove_extra);
        let applied = if self.options.dry_run {
            info!("dry run, {} changes to {:?} not applied", plan.patch.len(), destination);
            false
        } else {
            transaction::apply(&self.store, destination, &plan.patch)?;
            !plan.patch.is_empty()
        };

        Ok(SyncReport {
            source,
            destination: target,
            plan,
            applied,
        })
    }
}
