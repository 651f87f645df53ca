//! Resource containers.
//!
//! A [`ResourceStore`] opens containers either for reading or for a transactional update.
//! [`ImageStore`] operates on portable executable files, [`MemoryStore`](crate::MemoryStore) on in-memory containers.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, trace};
use tempfile::NamedTempFile;

use crate::{constants::*, errors::*, image::*, key::*, resource::*};


/// Read access to a resource container.
///
/// Enumeration is restartable: every call walks the container again.
pub trait ResourceReader {
    /// Enumerate the names of all resources of a type.
    ///
    /// # Returns
    /// Returns an empty list if the container has no resources of the type,
    /// or an error if the enumeration itself failed.
    fn names(&self, kind: &Identifier) -> Result<Vec<Identifier>, SyncError>;

    /// Enumerate the languages of a resource.
    ///
    /// # Returns
    /// Returns an empty list if the resource does not exist,
    /// or an error if the enumeration itself failed.
    fn languages(&self, kind: &Identifier, name: &Identifier) -> Result<Vec<LANGID>, SyncError>;

    /// Extract the data of a resource.
    fn extract(&self, key: &ResourceKey) -> Result<Vec<u8>, SyncError>;
}

/// Update session of a resource container.
///
/// Staged changes become visible only after [`commit`](ResourceUpdate::commit).
pub trait ResourceUpdate {
    /// Stage writing the payload of a resource, or deleting it if the payload is `None`.
    fn stage(&mut self, key: &ResourceKey, payload: Option<&[u8]>) -> Result<(), SyncError>;

    /// Apply all staged changes.
    fn commit(self) -> Result<(), SyncError>;

    /// Discard all staged changes.
    fn abort(self);
}

/// Provider of resource containers.
pub trait ResourceStore {
    type Reader: ResourceReader;
    type Update: ResourceUpdate;

    /// Open a container for reading.
    fn open_for_read(&self, path: &Path) -> Result<Self::Reader, SyncError>;

    /// Open a container for updating.
    fn begin_update(&self, path: &Path) -> Result<Self::Update, SyncError>;
}


/// Resource store operating on portable executable files.
///
/// Updates are staged in memory and written on commit by atomically replacing the file a path resolves to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageStore;

impl ImageStore {
    fn load(path: &Path, access: Access) -> Result<Image<'static>, SyncError> {
        Image::parse_file(path).map_err(|error| SyncError::Open {
            path: path.to_path_buf(),
            access,
            reason: error.to_string(),
        })
    }
}

impl ResourceStore for ImageStore {
    type Reader = ImageReader;
    type Update = ImageUpdate;

    fn open_for_read(&self, path: &Path) -> Result<ImageReader, SyncError> {
        let image = Self::load(path, Access::Read)?;
        debug!("opened {:?} for reading", path);
        Ok(ImageReader {
            directory: image.resource_directory().cloned().unwrap_or_default(),
        })
    }

    fn begin_update(&self, path: &Path) -> Result<ImageUpdate, SyncError> {
        let image = Self::load(path, Access::Update)?;
        debug!("opened {:?} for updating", path);
        Ok(ImageUpdate {
            path: path.to_path_buf(),
            directory: image.resource_directory().cloned().unwrap_or_default(),
            image,
            staged: 0,
        })
    }
}

/// Reader over the resource directory of a portable executable.
#[derive(Debug, Clone)]
pub struct ImageReader {
    directory: ResourceDirectory,
}

impl ImageReader {
    fn table(
        &self, kind: &Identifier, name: Option<&Identifier>,
    ) -> Result<Option<&ResourceTable>, SyncError> {
        let failure = |reason: &str| SyncError::Enumeration {
            kind:   kind.clone(),
            name:   name.cloned(),
            reason: reason.to_string(),
        };
        let Some(entry) = self.directory.root().get(kind) else {
            return Ok(None);
        };
        let names = entry.as_table().ok_or_else(|| failure("type entry holds data instead of a table"))?;
        let Some(name) = name else {
            return Ok(Some(names));
        };
        match names.get(name) {
            Some(entry) => entry
                .as_table()
                .map(Some)
                .ok_or_else(|| failure("name entry holds data instead of a language table")),
            None => Ok(None),
        }
    }
}

impl ResourceReader for ImageReader {
    fn names(&self, kind: &Identifier) -> Result<Vec<Identifier>, SyncError> {
        let names = self.table(kind, None)?;
        Ok(names.map(|table| table.entries().into_iter().cloned().collect()).unwrap_or_default())
    }

    fn languages(&self, kind: &Identifier, name: &Identifier) -> Result<Vec<LANGID>, SyncError> {
        let Some(languages) = self.table(kind, Some(name))? else {
            return Ok(Vec::new());
        };
        languages
            .entries()
            .into_iter()
            .map(|language| {
                language.as_numeric().and_then(|id| LANGID::try_from(id).ok()).ok_or_else(|| {
                    SyncError::Enumeration {
                        kind:   kind.clone(),
                        name:   Some(name.clone()),
                        reason: format!("{} is not a language identifier", language),
                    }
                })
            })
            .collect()
    }

    fn extract(&self, key: &ResourceKey) -> Result<Vec<u8>, SyncError> {
        trace!("extracting {}", key);
        self.directory
            .get(key)
            .map(|data| data.data().to_vec())
            .ok_or_else(|| SyncError::NotFound(key.clone()))
    }
}

/// Update session of a portable executable file.
#[derive(Debug)]
pub struct ImageUpdate {
    path:      PathBuf,
    image:     Image<'static>,
    directory: ResourceDirectory,
    staged:    usize,
}

impl ResourceUpdate for ImageUpdate {
    fn stage(&mut self, key: &ResourceKey, payload: Option<&[u8]>) -> Result<(), SyncError> {
        let result = match payload {
            Some(payload) => self.directory.insert(key, payload.to_vec()).map(|_| ()),
            None => self.directory.remove(key).map(|_| ()),
        };
        result.map_err(|error| SyncError::Update {
            key:    key.clone(),
            reason: error.to_string(),
        })?;
        self.staged += 1;
        Ok(())
    }

    fn commit(mut self) -> Result<(), SyncError> {
        let failure = |reason: String| SyncError::Commit {
            path: self.path.clone(),
            reason,
        };
        self.image
            .set_resource_directory(self.directory)
            .map_err(|error| failure(error.to_string()))?;
        replace_file(&self.path, self.image.data()).map_err(|error| failure(error.to_string()))?;
        info!("committed {} resource updates to {:?}", self.staged, self.path);
        Ok(())
    }

    fn abort(self) {
        debug!("discarding {} staged resource updates to {:?}", self.staged, self.path);
    }
}

/// Replace the contents of the file at `path`, following symlinks and keeping its permissions.
///
/// The data is written to a temporary file next to the target, flushed to disk and renamed over the target,
/// so the file is either fully old or fully new.
fn replace_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let path = fs::canonicalize(path)?;
    let permissions = fs::metadata(&path)?.permissions();
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut temporary = NamedTempFile::new_in(parent)?;
    temporary.write_all(data)?;
    temporary.as_file().set_permissions(permissions)?;
    temporary.as_file().sync_all()?;
    trace!("replacing {:?} with {:?}", path, temporary.path());
    temporary.persist(&path).map_err(|error| error.error)?;
    Ok(())
}
