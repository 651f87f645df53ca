//! Errors specific to reading and writing PE images and synchronizing their resources.

use std::{fmt, io::Error as IOError, path::PathBuf};

use crate::key::{Identifier, ResourceKey};

/// Error that can occur when reading and parsing bytes.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReadError(pub String);

/// Errors that can occur when reading a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageReadError {
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid section: {0}")]
    InvalidSection(String),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<ReadError> for ImageReadError {
    fn from(error: ReadError) -> Self { ImageReadError::InvalidBytes(error) }
}
impl From<IOError> for ImageReadError {
    fn from(error: IOError) -> Self { ImageReadError::IOError(error) }
}

/// Errors that can occur when writing a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageWriteError {
    #[error("not enough space in file header: {0} > {1}")]
    NotEnoughSpaceInHeader(u64, u64),
    #[error("section points outside image: {0} > {1}")]
    InvalidSectionRange(u64, u64),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<IOError> for ImageWriteError {
    fn from(error: IOError) -> Self { ImageWriteError::IOError(error) }
}

/// Errors that can occur when modifying the entries of a resource directory.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource {0} does not exist")]
    Missing(ResourceKey),
    #[error("resource {0} is not a leaf in a three level resource tree")]
    InvalidTable(ResourceKey),
    #[error("resource {0} has a numeric identifier outside the 16 bit range")]
    InvalidIdentifier(ResourceKey),
    #[error("malformed resource entry: {0}")]
    Malformed(String),
}

/// The way a resource container was being opened.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Access {
    Read,
    Update,
}
impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("reading"),
            Access::Update => f.write_str("updating"),
        }
    }
}

/// Errors that can occur when snapshotting or synchronizing resources.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("cannot open {path:?} for {access}: {reason}")]
    Open {
        path:   PathBuf,
        access: Access,
        reason: String,
    },
    #[error("cannot enumerate {target}: {reason}", target = enumeration_target(.kind, .name))]
    Enumeration {
        kind:   Identifier,
        name:   Option<Identifier>,
        reason: String,
    },
    #[error("resource {0} was enumerated but could not be extracted")]
    NotFound(ResourceKey),
    #[error("resource {0} was enumerated more than once")]
    DuplicateKey(ResourceKey),
    #[error("cannot stage update of resource {key}: {reason}")]
    Update { key: ResourceKey, reason: String },
    #[error("cannot commit update of {path:?}: {reason}")]
    Commit { path: PathBuf, reason: String },
}

fn enumeration_target(kind: &Identifier, name: &Option<Identifier>) -> String {
    match name {
        Some(name) => format!("languages of resource {} of type {}", name, kind),
        None => format!("names of resource type {}", kind),
    }
}
