//! An in-memory stand-in for the source-control collaborator.

use std::{collections::HashMap, path::PathBuf};

use sha1::{Digest, Sha1};

use crate::{
    error::{CovError, Result},
    oid::Oid,
    scm::{CommitInfo, Scm, Signature, TreeEntry},
};

#[derive(Default)]
pub struct FakeScm {
    commits: HashMap<Oid, CommitInfo>,
    trees: HashMap<Oid, Vec<TreeEntry>>,
    blobs: HashMap<Oid, Vec<u8>>,
}

fn hash(kind: &str, payload: &[u8]) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(payload);
    Oid::from_bytes(hasher.finalize().into())
}

impl FakeScm {
    pub fn add_blob(&mut self, bytes: &[u8]) -> Oid {
        let oid = hash("blob", bytes);
        self.blobs.insert(oid, bytes.to_vec());
        oid
    }

    pub fn add_tree(&mut self, entries: Vec<TreeEntry>) -> Oid {
        let mut payload = Vec::new();
        for entry in &entries {
            payload.extend_from_slice(entry.name.as_bytes());
            payload.extend_from_slice(entry.oid.as_bytes());
        }
        let oid = hash("tree", &payload);
        self.trees.insert(oid, entries);
        oid
    }

    pub fn add_commit(&mut self, tree: Oid, message: &str) -> Oid {
        let oid = hash("commit", &[tree.as_bytes().as_slice(), message.as_bytes()].concat());
        self.commits.insert(
            oid,
            CommitInfo {
                tree,
                parents: Vec::new(),
                author: Signature {
                    name: "Johnny Appleseed".into(),
                    email: "johnny@appleseed.com".into(),
                },
                committer: Signature {
                    name: "Johnny Appleseed".into(),
                    email: "johnny@appleseed.com".into(),
                },
                message: message.to_string(),
                time: 1_650_000_000,
            },
        );
        oid
    }
}

impl Scm for FakeScm {
    fn lookup_commit(&self, oid: Oid) -> Result<CommitInfo> {
        self.commits.get(&oid).cloned().ok_or(CovError::NotFound)
    }

    fn lookup_tree(&self, oid: Oid) -> Result<Vec<TreeEntry>> {
        self.trees.get(&oid).cloned().ok_or(CovError::NotFound)
    }

    fn lookup_blob(&self, oid: Oid) -> Result<Vec<u8>> {
        self.blobs.get(&oid).cloned().ok_or(CovError::NotFound)
    }

    fn exists(&self, oid: Oid) -> bool {
        self.commits.contains_key(&oid)
            || self.trees.contains_key(&oid)
            || self.blobs.contains_key(&oid)
    }

    fn workdir(&self) -> Option<PathBuf> {
        None
    }
}
