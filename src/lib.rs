//! Resource **sync**hronization for **p**ortable **e**xecutables.
//!
//! Supports:
//! * Snapshotting the icon, icon group and version resources of an executable
//! * Computing the minimal set of writes and deletes that aligns one executable's resources with another's
//! * Applying those changes in a single all-or-nothing update
//!
//! See [`Synchronizer`] for the main entry point, and [`Image`] for parsing and updating the resource directory of an executable image.
//!
//! # Examples
//!
//! ### Resource synchronization
//! ```
//! use pesync::{ImageStore, SyncOptions, Synchronizer};
//!
//! let options = SyncOptions {
//!     remove_extra: true,
//!     ..SyncOptions::with_version(true)
//! };
//! let synchronizer = Synchronizer::new(ImageStore, options);
//!
//! // copy icons and version information from the source into the target
//! let report = synchronizer.synchronize(SOURCE_PATH, TARGET_PATH)?;
//! for operation in &report.plan.patch {
//!     println!("{}", operation);
//! }
//! ```
//!
//! ### Snapshot comparison
//! ```
//! use pesync::{diff, ImageStore, ResourceStore, Snapshot, SyncOptions};
//!
//! let types = SyncOptions::default().types;
//! let source = Snapshot::build(&ImageStore.open_for_read(SOURCE_PATH.as_ref())?, &types)?;
//! let target = Snapshot::build(&ImageStore.open_for_read(TARGET_PATH.as_ref())?, &types)?;
//!
//! // resources to write into the target, resources only in the target are kept
//! let plan = diff(&source, &target, false);
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

pub(crate) mod errors;
pub(crate) mod image;
pub(crate) mod key;
pub(crate) mod memory;
pub(crate) mod patch;
pub(crate) mod resource;
pub(crate) mod snapshot;
pub(crate) mod store;
pub(crate) mod sync;
pub(crate) mod transaction;
pub(crate) mod util;

pub mod constants;
pub mod types;

pub use crate::{
    errors::*,
    image::*,
    key::*,
    memory::*,
    patch::*,
    resource::*,
    snapshot::*,
    store::*,
    sync::*,
    transaction::{apply, Transaction},
};
