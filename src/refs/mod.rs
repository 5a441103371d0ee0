//! The directory-backed reference database.
//!
//! References are loose files under the repository directory: the content is
//! either 40 hex characters plus LF (a direct ref) or `ref: <name>` plus LF
//! (a symbolic ref). A read-only `packed-refs` file is consulted when a loose
//! file is missing. All updates are temp-file + rename; a compare-and-swap
//! update additionally holds a `.lock` sibling of the reference across its
//! read-compare-rename window, so exactly one of two racing writers lands
//! and the other observes the winner's value.

pub mod name;

use std::{
    collections::VecDeque,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::{
    error::{CovError, Result},
    odb::zstream::SafeFile,
    oid::{Oid, OID_HEX_SIZE},
};

const HEAD: &str = "HEAD";

/// Symbolic chains longer than this are treated as broken.
const MAX_SYMBOLIC_DEPTH: usize = 10;

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Direct(Oid),
    Symbolic(String),
}

/// A named reference record, direct or symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
    target: RefTarget,
}

impl Reference {
    pub fn new(name: String, target: RefTarget) -> Reference {
        Reference { name, target }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name with its `refs/heads/` or `refs/tags/` category stripped.
    pub fn shorthand(&self) -> &str {
        self.name
            .strip_prefix("refs/heads/")
            .or_else(|| self.name.strip_prefix("refs/tags/"))
            .unwrap_or(&self.name)
    }

    pub fn is_branch(&self) -> bool {
        self.name.starts_with("refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with("refs/tags/")
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic(_))
    }

    pub fn direct_target(&self) -> Option<Oid> {
        match &self.target {
            RefTarget::Direct(oid) => Some(*oid),
            RefTarget::Symbolic(_) => None,
        }
    }

    pub fn symbolic_target(&self) -> Option<&str> {
        match &self.target {
            RefTarget::Direct(_) => None,
            RefTarget::Symbolic(target) => Some(target),
        }
    }

    /// A direct reference holding the zero oid: a branch that exists in name
    /// only.
    pub fn is_unborn(&self) -> bool {
        matches!(&self.target, RefTarget::Direct(oid) if oid.is_zero())
    }
}

/// The reference store rooted at the repository directory.
pub struct References {
    root: PathBuf,
}

impl References {
    pub fn new(root: PathBuf) -> References {
        References { root }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reads the reference named `name` (a full name or `HEAD`).
    pub fn lookup(&self, name: &str) -> Result<Reference> {
        if !name::is_valid_name(name) {
            return Err(CovError::InvalidSpec(name.to_string()));
        }
        if let Some(reference) = self.read_loose(name)? {
            return Ok(reference);
        }
        if let Some(reference) = self.read_packed(name)? {
            return Ok(reference);
        }
        Err(CovError::NotFound)
    }

    fn read_loose(&self, name: &str) -> Result<Option<Reference>> {
        let path = self.ref_path(name);
        // a directory of the same name (refs/heads/feature holding the
        // nested branch feature/login) is absence, not an error
        if path.is_dir() {
            return Ok(None);
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(parse_ref_content(name, &content)?))
    }

    fn read_packed(&self, name: &str) -> Result<Option<Reference>> {
        let content = match fs::read_to_string(self.root.join("packed-refs")) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        for line in content.lines() {
            if line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let Some((hex, packed_name)) = line.split_once(' ') else {
                continue;
            };
            if packed_name == name {
                let oid = Oid::from_hex(hex).map_err(|_| CovError::BadSyntax)?;
                return Ok(Some(Reference::new(
                    name.to_string(),
                    RefTarget::Direct(oid),
                )));
            }
        }
        Ok(None)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.read_loose(name)?.is_some() || self.read_packed(name)?.is_some())
    }

    /// Resolves a shorthand the way a user would write it: as given, under
    /// `refs/`, as a tag, then as a branch.
    pub fn dwim(&self, shorthand: &str) -> Result<Reference> {
        let candidates = [
            shorthand.to_string(),
            format!("refs/{shorthand}"),
            format!("refs/tags/{shorthand}"),
            format!("refs/heads/{shorthand}"),
        ];
        for candidate in &candidates {
            if !name::is_valid_name(candidate) {
                continue;
            }
            match self.lookup(candidate) {
                Ok(reference) => return Ok(reference),
                Err(CovError::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(CovError::NotFound)
    }

    fn write_ref(&self, name: &str, content: &str) -> Result<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = SafeFile::create(&path)?;
        if let Err(err) = file.write_all(content.as_bytes()) {
            file.rollback();
            return Err(err.into());
        }
        file.commit()
    }

    /// Creates a direct reference. Without `force`, an existing reference of
    /// the same name is `Exists`.
    pub fn create(&self, name: &str, target: Oid, force: bool) -> Result<Reference> {
        if !name::is_valid_name(name) {
            return Err(CovError::InvalidSpec(name.to_string()));
        }
        if !force && self.exists(name)? {
            return Err(CovError::Exists);
        }
        self.write_ref(name, &format!("{target}\n"))?;
        Ok(Reference::new(name.to_string(), RefTarget::Direct(target)))
    }

    /// Creates a symbolic reference pointing at `target`.
    pub fn create_symbolic(&self, name: &str, target: &str, force: bool) -> Result<Reference> {
        if !name::is_valid_name(name) {
            return Err(CovError::InvalidSpec(name.to_string()));
        }
        if !name::is_valid_name(target) {
            return Err(CovError::InvalidSpec(target.to_string()));
        }
        if !force && self.exists(name)? {
            return Err(CovError::Exists);
        }
        self.write_ref(name, &format!("ref: {target}\n"))?;
        Ok(Reference::new(
            name.to_string(),
            RefTarget::Symbolic(target.to_string()),
        ))
    }

    /// The compare-and-swap primitive. Writes `new` only if the current
    /// value equals `expected` (a missing reference counts as the zero oid;
    /// a symbolic value never matches a direct expectation). The reference's
    /// `.lock` sibling is held across the read-compare-rename window, so of
    /// two racing callers exactly one writes. Returns the reference as
    /// stored afterwards and whether this call is the one that stored it; a
    /// `false` means some other writer got there first and nothing was
    /// changed.
    pub fn create_matching(
        &self,
        name: &str,
        new: Oid,
        expected: Oid,
    ) -> Result<(Reference, bool)> {
        if !name::is_valid_name(name) {
            return Err(CovError::InvalidSpec(name.to_string()));
        }
        let path = self.ref_path(name);
        let lock = RefLock::acquire(&path)?;

        let current = match self.read_loose(name)? {
            Some(reference) => Some(reference),
            None => self.read_packed(name)?,
        };
        let matches = match &current {
            None => expected.is_zero(),
            Some(reference) => reference.direct_target() == Some(expected),
        };
        if !matches {
            let stored = current
                .unwrap_or_else(|| Reference::new(name.to_string(), RefTarget::Direct(Oid::ZERO)));
            return Ok((stored, false));
        }
        lock.commit(&path, &format!("{new}\n"))?;
        Ok((
            Reference::new(name.to_string(), RefTarget::Direct(new)),
            true,
        ))
    }

    /// Walks the `refs/<prefix>/` subtree. The order is stable across
    /// repeated iteration of an unchanged tree.
    pub fn iterator(&self, prefix: &str) -> Result<RefIter<'_>> {
        let base = if prefix.is_empty() {
            "refs".to_string()
        } else {
            format!("refs/{}", prefix.trim_matches('/'))
        };

        let mut names = Vec::new();
        collect_loose(&self.root, &self.root.join(&base), &mut names)?;
        if let Ok(packed) = fs::read_to_string(self.root.join("packed-refs")) {
            for line in packed.lines() {
                if line.starts_with('#') || line.starts_with('^') {
                    continue;
                }
                if let Some((_, packed_name)) = line.split_once(' ') {
                    if packed_name.starts_with(&format!("{base}/"))
                        && !names.iter().any(|n| n.as_str() == packed_name)
                    {
                        names.push(packed_name.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();

        Ok(RefIter {
            refs: self,
            names: names.into(),
        })
    }

    /// Removes a loose reference. `HEAD` and the branch it currently points
    /// at cannot be removed.
    pub fn remove(&self, reference: &Reference) -> Result<()> {
        if reference.name() == HEAD {
            return Err(CovError::InvalidSpec(HEAD.to_string()));
        }
        if reference.is_branch() {
            if let Ok(head) = self.lookup(HEAD) {
                if head.symbolic_target() == Some(reference.name()) {
                    return Err(CovError::CurrentBranch);
                }
            }
        }
        match fs::remove_file(self.ref_path(reference.name())) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(CovError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Follows symbolic targets until reaching a direct reference. A chain
    /// ending at a missing branch yields an unborn (zero) direct reference
    /// named after the final target.
    pub fn peel(&self, reference: &Reference) -> Result<Reference> {
        let mut current = reference.clone();
        for _ in 0..MAX_SYMBOLIC_DEPTH {
            let Some(target) = current.symbolic_target() else {
                return Ok(current);
            };
            match self.lookup(target) {
                Ok(next) => current = next,
                Err(CovError::NotFound) => {
                    return Ok(Reference::new(
                        target.to_string(),
                        RefTarget::Direct(Oid::ZERO),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
        Err(CovError::NotFound)
    }

    /// Copies a reference under a new shorthand in the branch or tag
    /// category.
    pub fn copy_ref(
        &self,
        reference: &Reference,
        new_shorthand: &str,
        as_branch: bool,
        force: bool,
    ) -> Result<Reference> {
        if !name::is_valid_shorthand(new_shorthand) {
            return Err(CovError::InvalidSpec(new_shorthand.to_string()));
        }
        let category = if as_branch { "heads" } else { "tags" };
        let new_name = format!("refs/{category}/{new_shorthand}");
        match &reference.target {
            RefTarget::Direct(oid) => self.create(&new_name, *oid, force),
            RefTarget::Symbolic(target) => self.create_symbolic(&new_name, target, force),
        }
    }

    pub fn head(&self) -> Result<Reference> {
        self.lookup(HEAD)
    }

    /// Retargets `HEAD` at a branch (kept symbolic even when the branch does
    /// not exist yet).
    pub fn set_head(&self, branch_shorthand: &str) -> Result<Reference> {
        if !name::is_valid_shorthand(branch_shorthand) {
            return Err(CovError::InvalidSpec(branch_shorthand.to_string()));
        }
        self.write_ref(HEAD, &format!("ref: refs/heads/{branch_shorthand}\n"))?;
        self.lookup(HEAD)
    }

    /// Detaches `HEAD` at an oid.
    pub fn set_head_detached(&self, target: Oid) -> Result<Reference> {
        self.write_ref(HEAD, &format!("{target}\n"))?;
        self.lookup(HEAD)
    }

    pub fn create_branch(&self, shorthand: &str, target: Oid, force: bool) -> Result<Reference> {
        if !name::is_valid_shorthand(shorthand) {
            return Err(CovError::InvalidSpec(shorthand.to_string()));
        }
        self.create(&format!("refs/heads/{shorthand}"), target, force)
    }

    pub fn create_tag(&self, shorthand: &str, target: Oid, force: bool) -> Result<Reference> {
        if !name::is_valid_shorthand(shorthand) {
            return Err(CovError::InvalidSpec(shorthand.to_string()));
        }
        self.create(&format!("refs/tags/{shorthand}"), target, force)
    }

    pub fn branches(&self) -> Result<RefIter<'_>> {
        self.iterator("heads")
    }

    pub fn tags(&self) -> Result<RefIter<'_>> {
        self.iterator("tags")
    }
}

/// The `.lock` sibling serialising writers of one reference.
///
/// Acquisition is `create_new` on the lock path, retried briefly while a
/// concurrent writer holds it; committing renames the lock file over the
/// reference, which releases the lock in the same step.
struct RefLock {
    lock_path: PathBuf,
}

/// How long to wait on a held lock before reporting the contention. A lock
/// outliving this is a crashed writer's leftover.
const LOCK_RETRIES: u32 = 100;

impl RefLock {
    fn acquire(path: &Path) -> Result<RefLock> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));
        let mut attempts = 0;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => return Ok(RefLock { lock_path }),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempts < LOCK_RETRIES => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn commit(self, target: &Path, content: &str) -> Result<()> {
        fs::write(&self.lock_path, content)?;
        fs::rename(&self.lock_path, target)?;
        Ok(())
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn parse_ref_content(name: &str, content: &str) -> Result<Reference> {
    let line = content.strip_suffix('\n').unwrap_or(content);
    if let Some(target) = line.strip_prefix("ref: ") {
        let target = target.trim();
        if !name::is_valid_name(target) {
            return Err(CovError::BadSyntax);
        }
        return Ok(Reference::new(
            name.to_string(),
            RefTarget::Symbolic(target.to_string()),
        ));
    }
    let line = line.trim();
    if line.len() != OID_HEX_SIZE {
        return Err(CovError::BadSyntax);
    }
    let oid = Oid::from_hex(line).map_err(|_| CovError::BadSyntax)?;
    Ok(Reference::new(name.to_string(), RefTarget::Direct(oid)))
}

fn collect_loose(root: &Path, dir: &Path, names: &mut Vec<String>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_loose(root, &path, names)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            if let Some(relative) = relative.to_str() {
                names.push(relative.replace('\\', "/"));
            }
        }
    }
    Ok(())
}

/// Iterator over a subtree of the reference namespace; file contents are
/// read lazily as the caller advances.
pub struct RefIter<'a> {
    refs: &'a References,
    names: VecDeque<String>,
}

impl Iterator for RefIter<'_> {
    type Item = Result<Reference>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let name = self.names.pop_front()?;
            match self.refs.lookup(&name) {
                // a ref deleted mid-iteration is skipped, not an error
                Err(CovError::NotFound) => continue,
                result => return Some(result),
            }
        }
    }
}
