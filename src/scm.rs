//! The source-control collaborator boundary.
//!
//! The core never inspects the host repository itself; commit metadata,
//! trees and blobs all come through this trait, and the implementation
//! behind it is opaque.

use std::path::PathBuf;

use crate::{
    error::{CovError, Result},
    oid::Oid,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// Commit metadata as the collaborator reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitInfo {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// Commit time in seconds since epoch, UTC.
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub oid: Oid,
    pub is_tree: bool,
}

pub trait Scm {
    fn lookup_commit(&self, oid: Oid) -> Result<CommitInfo>;

    fn lookup_tree(&self, oid: Oid) -> Result<Vec<TreeEntry>>;

    fn lookup_blob(&self, oid: Oid) -> Result<Vec<u8>>;

    fn exists(&self, oid: Oid) -> bool;

    fn workdir(&self) -> Option<PathBuf>;

    /// Resolves a slash-separated path through nested trees to the oid it
    /// names.
    fn tree_entry_bypath(&self, tree: Oid, path: &str) -> Result<Oid> {
        let mut current = tree;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let entries = self.lookup_tree(current)?;
            let entry = entries
                .iter()
                .find(|entry| entry.name == component)
                .ok_or(CovError::NotFound)?;
            if components.peek().is_none() {
                return Ok(entry.oid);
            }
            if !entry.is_tree {
                return Err(CovError::NotFound);
            }
            current = entry.oid;
        }
        Err(CovError::NotFound)
    }
}
