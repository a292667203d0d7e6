//! Object model definitions for Git commits, tags, and notes, plus the
//! supporting trait that lets higher layers build strongly typed values
//! out of raw bytes read back from `git cat-file`.

pub mod commit;
pub mod note;
pub mod signature;
pub mod tag;
pub mod types;

use std::fmt::Display;

use crate::{errors::GitError, hash::ObjectHash};

pub use types::ObjectType;

/// **The Object Trait**
/// Defines the common interface for all Git object types handled by this crate.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a byte slice (the object's raw, uncompressed content as
    /// produced by `git cat-file <hash>` or inflated from a pack entry).
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized;

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    fn get_size(&self) -> usize;

    fn to_data(&self) -> Result<Vec<u8>, GitError>;

    /// Computes the object hash from serialized data.
    ///
    /// Default implementation serializes the object and computes the hash from that data.
    /// Override only if you need custom hash computation or caching.
    fn object_hash(&self) -> Result<ObjectHash, GitError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
