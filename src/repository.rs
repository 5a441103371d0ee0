//! The repository façade: locating, initialising and opening a `.covdata`
//! directory, and the HEAD/current-branch semantics layered on the
//! reference store.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    config::ConfigFile,
    error::{CovError, Result},
    modules::Modules,
    odb::ObjectStore,
    oid::Oid,
    projection::{self, DiffKind, FileCoverage, FileStats, ProjectedEntries, ReportFilter},
    refs::References,
    report::{Files, Marks, Object},
    revparse::Revs,
    scm::Scm,
};

pub const COVDATA_DIR: &str = ".covdata";
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Reinitialise an existing repository instead of failing with `Exists`.
    pub force: bool,
}

/// Whether upward discovery may cross filesystem boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discover {
    #[default]
    WithinFs,
    AcrossFs,
}

/// A snapshot of where `HEAD` pointed at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Branch shorthand when attached.
    pub branch: Option<String>,
    /// Full name of the branch ref when attached.
    pub ref_name: Option<String>,
    /// The tip, when one exists (`None` for an unborn branch).
    pub tip: Option<Oid>,
}

impl HeadInfo {
    pub fn is_detached(&self) -> bool {
        self.ref_name.is_none()
    }
}

pub struct Repository {
    commondir: PathBuf,
    config: ConfigFile,
    objects: ObjectStore,
    refs: References,
}

impl Repository {
    /// Creates `<worktree>/.covdata` with its default layout: a `HEAD`
    /// attached to `main`, the config naming the source-control repository,
    /// and the `objects/` and `refs/` trees.
    pub fn init(worktree: &Path, git_dir: &Path, options: InitOptions) -> Result<Repository> {
        if !worktree.is_dir() {
            return Err(CovError::NotAWorktree);
        }
        let commondir = worktree.join(COVDATA_DIR);
        if commondir.join("HEAD").exists() && !options.force {
            return Err(CovError::Exists);
        }

        fs::create_dir_all(commondir.join("objects"))?;
        fs::create_dir_all(commondir.join("refs/heads"))?;
        fs::create_dir_all(commondir.join("refs/tags"))?;

        References::new(commondir.clone()).set_head(DEFAULT_BRANCH)?;

        let mut config = ConfigFile::open(&commondir.join("config"))?;
        config.set_string("core.gitdir", &git_dir.display().to_string())?;
        config.save()?;

        Repository::open_commondir(commondir)
    }

    /// Opens a repository from its `.covdata` directory, its worktree, or
    /// any subdirectory of the worktree (upward discovery).
    pub fn open(path: &Path) -> Result<Repository> {
        if path.join("HEAD").is_file() && path.join("config").is_file() {
            return Repository::open_commondir(path.to_path_buf());
        }
        let commondir = Repository::discover(path, Discover::default())?;
        Repository::open_commondir(commondir)
    }

    /// Walks up from `start` looking for a `.covdata` directory.
    pub fn discover(start: &Path, across: Discover) -> Result<PathBuf> {
        let mut dir = fs::canonicalize(start)?;
        #[cfg(unix)]
        let start_dev = {
            use std::os::unix::fs::MetadataExt;
            fs::metadata(&dir)?.dev()
        };

        loop {
            let candidate = dir.join(COVDATA_DIR);
            if candidate.is_dir() {
                return Ok(candidate);
            }
            if !dir.pop() {
                return Err(CovError::NotFound);
            }
            #[cfg(unix)]
            if across == Discover::WithinFs {
                use std::os::unix::fs::MetadataExt;
                if fs::metadata(&dir)?.dev() != start_dev {
                    return Err(CovError::NotFound);
                }
            }
        }
    }

    fn open_commondir(commondir: PathBuf) -> Result<Repository> {
        if !commondir.join("HEAD").is_file() || !commondir.join("config").is_file() {
            return Err(CovError::UninitializedWorktree);
        }
        let config = ConfigFile::open(&commondir.join("config"))?;
        if config.get_string("core.gitdir").is_none() {
            return Err(CovError::UninitializedWorktree);
        }
        Ok(Repository {
            objects: ObjectStore::new(commondir.join("objects")),
            refs: References::new(commondir.clone()),
            config,
            commondir,
        })
    }

    pub fn commondir(&self) -> &Path {
        &self.commondir
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn refs(&self) -> &References {
        &self.refs
    }

    /// The source-control repository path, resolved against the commondir
    /// when stored relative.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let stored = self
            .config
            .get_string("core.gitdir")
            .ok_or(CovError::UninitializedWorktree)?;
        let path = PathBuf::from(stored);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.commondir.join(path))
        }
    }

    /// The worktree: the config override when set, else the commondir's
    /// parent.
    pub fn worktree(&self) -> Option<PathBuf> {
        if let Some(explicit) = self.config.get_string("core.worktree") {
            return Some(PathBuf::from(explicit));
        }
        self.commondir.parent().map(Path::to_path_buf)
    }

    pub fn write(&self, obj: &Object) -> Result<Oid> {
        self.objects.write(obj)
    }

    pub fn lookup(&self, oid: Oid) -> Result<Object> {
        self.objects.lookup(oid)
    }

    pub fn find_partial(&self, prefix: &str) -> Result<(Oid, Object)> {
        self.objects.lookup_prefix(prefix)
    }

    pub fn revparse(&self, spec: &str) -> Result<Revs> {
        Revs::parse(self, spec)
    }

    pub fn revparse_single(&self, spec: &str) -> Result<Oid> {
        Revs::parse_single(self, spec)
    }

    /// Where `HEAD` points right now.
    pub fn current_head(&self) -> Result<HeadInfo> {
        let head = self.refs.head()?;
        match head.symbolic_target() {
            Some(target) => {
                let tip = match self.refs.lookup(target) {
                    Ok(reference) => reference.direct_target().filter(|oid| !oid.is_zero()),
                    Err(CovError::NotFound) => None,
                    Err(err) => return Err(err),
                };
                let shorthand = target.strip_prefix("refs/heads/").unwrap_or(target);
                Ok(HeadInfo {
                    branch: Some(shorthand.to_string()),
                    ref_name: Some(target.to_string()),
                    tip,
                })
            }
            None => Ok(HeadInfo {
                branch: None,
                ref_name: None,
                tip: head.direct_target().filter(|oid| !oid.is_zero()),
            }),
        }
    }

    /// Moves the current branch (or a detached `HEAD`) to `new_tip`,
    /// conditioned on the `old` snapshot. Returns whether this caller's
    /// update won; a `false` means a concurrent updater got there first and
    /// the caller should re-read and retry or report it.
    pub fn update_current_branch(&self, new_tip: Oid, old: &HeadInfo) -> Result<bool> {
        let expected = old.tip.unwrap_or(Oid::ZERO);
        match &old.ref_name {
            Some(name) => {
                if !name.starts_with("refs/heads/") {
                    return Err(CovError::NotABranch);
                }
                let (_, modified) = self.refs.create_matching(name, new_tip, expected)?;
                Ok(modified)
            }
            None => {
                let (_, modified) = self.refs.create_matching("HEAD", new_tip, expected)?;
                Ok(modified)
            }
        }
    }

    /// The last-known module overlay stored in the repository, or an empty
    /// one when none was saved yet.
    pub fn modules(&self) -> Result<Modules> {
        Ok(Modules::from_config(&self.modules_config()?))
    }

    /// The config image backing the `modules` file (also the handle
    /// [`Modules::dump`] flushes to).
    pub fn modules_config(&self) -> Result<ConfigFile> {
        ConfigFile::open(&self.commondir.join("modules"))
    }

    pub fn modules_from_config(path: &Path) -> Result<Modules> {
        Ok(Modules::from_config(&ConfigFile::open(path)?))
    }

    pub fn modules_from_commit(&self, scm: &dyn Scm, commit: Oid) -> Result<Modules> {
        Modules::from_commit(scm, commit)
    }

    /// Projects per-file statistics through a filter into the rated table.
    pub fn project(
        &self,
        report: &[FileStats],
        filter: &ReportFilter,
        marks: &Marks,
    ) -> ProjectedEntries {
        projection::project_report(filter, report, marks)
    }

    /// Pairs up two file lists into projection input: matched by path first,
    /// then by contents oid for rename detection; leftovers become added or
    /// removed rows.
    pub fn diff_file_stats(current: &Files, previous: Option<&Files>) -> Vec<FileStats> {
        let prev_entries = previous.map(Files::entries).unwrap_or(&[]);

        let mut by_path: HashMap<&str, usize> = HashMap::new();
        let mut by_contents: HashMap<Oid, usize> = HashMap::new();
        for (index, entry) in prev_entries.iter().enumerate() {
            by_path.insert(entry.path.as_str(), index);
            if !entry.contents.is_zero() {
                by_contents.entry(entry.contents).or_insert(index);
            }
        }

        let mut used_prev = vec![false; prev_entries.len()];
        let mut out = Vec::with_capacity(current.entries().len());

        for entry in current.entries() {
            let coverage = FileCoverage {
                stats: entry.stats,
                contents: entry.contents,
            };
            if let Some(&index) = by_path.get(entry.path.as_str()) {
                used_prev[index] = true;
                let prev = &prev_entries[index];
                let diff_kind = if prev.contents == entry.contents && prev.stats == entry.stats {
                    DiffKind::Unchanged
                } else {
                    DiffKind::Modified
                };
                out.push(FileStats {
                    filename: entry.path.clone(),
                    current: Some(coverage),
                    previous: Some(FileCoverage {
                        stats: prev.stats,
                        contents: prev.contents,
                    }),
                    previous_name: None,
                    diff_kind,
                });
                continue;
            }
            if let Some(&index) = by_contents
                .get(&entry.contents)
                .filter(|&&index| !used_prev[index])
                .filter(|_| !entry.contents.is_zero())
            {
                used_prev[index] = true;
                let prev = &prev_entries[index];
                out.push(FileStats {
                    filename: entry.path.clone(),
                    current: Some(coverage),
                    previous: Some(FileCoverage {
                        stats: prev.stats,
                        contents: prev.contents,
                    }),
                    previous_name: Some(prev.path.clone()),
                    diff_kind: DiffKind::Renamed,
                });
                continue;
            }
            out.push(FileStats {
                filename: entry.path.clone(),
                current: Some(coverage),
                previous: None,
                previous_name: None,
                diff_kind: DiffKind::Added,
            });
        }

        for (index, entry) in prev_entries.iter().enumerate() {
            if used_prev[index] {
                continue;
            }
            out.push(FileStats {
                filename: entry.path.clone(),
                current: None,
                previous: Some(FileCoverage {
                    stats: entry.stats,
                    contents: entry.contents,
                }),
                previous_name: None,
                diff_kind: DiffKind::Removed,
            });
        }

        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        out
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::report::FileEntry;

    struct Ctx {
        temp_dir: TempDir,
    }

    fn setup() -> Ctx {
        Ctx {
            temp_dir: TempDir::new().ok().unwrap(),
        }
    }

    fn oid(byte: u8) -> Oid {
        Oid::from_bytes([byte; 20])
    }

    #[test]
    fn test_init_creates_layout() {
        let ctx = setup();
        let repo =
            Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default())
                .unwrap();

        let commondir = ctx.temp_dir.path().join(COVDATA_DIR);
        assert_eq!(repo.commondir(), commondir);
        assert_eq!(
            fs::read_to_string(commondir.join("HEAD")).unwrap(),
            "ref: refs/heads/main\n"
        );
        assert!(commondir.join("objects").is_dir());
        assert!(commondir.join("refs/heads").is_dir());
        assert_eq!(repo.git_dir().unwrap(), commondir.join("../.git"));
        assert_eq!(repo.worktree(), Some(ctx.temp_dir.path().to_path_buf()));
    }

    #[test]
    fn test_init_twice_needs_force() {
        let ctx = setup();
        Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default())
            .unwrap();
        assert!(matches!(
            Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default()),
            Err(CovError::Exists)
        ));
        Repository::init(
            ctx.temp_dir.path(),
            Path::new("../.git"),
            InitOptions { force: true },
        )
        .unwrap();
    }

    #[test]
    fn test_init_requires_directory() {
        let ctx = setup();
        assert!(matches!(
            Repository::init(
                &ctx.temp_dir.path().join("missing"),
                Path::new("../.git"),
                InitOptions::default()
            ),
            Err(CovError::NotAWorktree)
        ));
    }

    #[test]
    fn test_open_discovers_from_subdir() {
        let ctx = setup();
        Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default())
            .unwrap();
        let subdir = ctx.temp_dir.path().join("src/nested/deep");
        fs::create_dir_all(&subdir).unwrap();

        let repo = Repository::open(&subdir).unwrap();
        assert!(repo.commondir().ends_with(COVDATA_DIR));
    }

    #[test]
    fn test_open_uninitialized() {
        let ctx = setup();
        let bare = ctx.temp_dir.path().join(COVDATA_DIR);
        fs::create_dir_all(&bare).unwrap();
        assert!(matches!(
            Repository::open(ctx.temp_dir.path()),
            Err(CovError::UninitializedWorktree)
        ));
    }

    #[test]
    fn test_head_lifecycle() {
        let ctx = setup();
        let repo =
            Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default())
                .unwrap();

        // attached to an unborn main
        let head = repo.current_head().unwrap();
        assert_eq!(head.branch.as_deref(), Some("main"));
        assert_eq!(head.tip, None);
        assert!(!head.is_detached());

        // first update moves the branch from "nothing" to a tip
        assert!(repo.update_current_branch(oid(0x11), &head).unwrap());
        assert_eq!(repo.current_head().unwrap().tip, Some(oid(0x11)));

        // a stale snapshot loses
        assert!(!repo.update_current_branch(oid(0x22), &head).unwrap());
        assert_eq!(repo.current_head().unwrap().tip, Some(oid(0x11)));

        // a fresh snapshot wins
        let head = repo.current_head().unwrap();
        assert!(repo.update_current_branch(oid(0x22), &head).unwrap());
        assert_eq!(repo.current_head().unwrap().tip, Some(oid(0x22)));
    }

    #[test]
    fn test_detached_head_update() {
        let ctx = setup();
        let repo =
            Repository::init(ctx.temp_dir.path(), Path::new("../.git"), InitOptions::default())
                .unwrap();
        repo.refs().set_head_detached(oid(0x11)).unwrap();

        let head = repo.current_head().unwrap();
        assert!(head.is_detached());
        assert_eq!(head.tip, Some(oid(0x11)));

        assert!(repo.update_current_branch(oid(0x22), &head).unwrap());
        let after = repo.current_head().unwrap();
        assert!(after.is_detached());
        assert_eq!(after.tip, Some(oid(0x22)));
    }

    #[test]
    fn test_diff_file_stats() {
        let previous = Files::new(vec![
            FileEntry::build()
                .path("src/same.rs")
                .line_stats(10, 10, 5)
                .contents(oid(0x01))
                .create(),
            FileEntry::build()
                .path("src/old_name.rs")
                .line_stats(8, 8, 8)
                .contents(oid(0x02))
                .create(),
            FileEntry::build()
                .path("src/gone.rs")
                .line_stats(4, 4, 0)
                .contents(oid(0x03))
                .create(),
            FileEntry::build()
                .path("src/touched.rs")
                .line_stats(6, 6, 6)
                .contents(oid(0x04))
                .create(),
        ])
        .unwrap();
        let current = Files::new(vec![
            FileEntry::build()
                .path("src/same.rs")
                .line_stats(10, 10, 5)
                .contents(oid(0x01))
                .create(),
            FileEntry::build()
                .path("src/new_name.rs")
                .line_stats(8, 8, 8)
                .contents(oid(0x02))
                .create(),
            FileEntry::build()
                .path("src/brand_new.rs")
                .line_stats(3, 3, 3)
                .contents(oid(0x05))
                .create(),
            FileEntry::build()
                .path("src/touched.rs")
                .line_stats(6, 6, 2)
                .contents(oid(0x06))
                .create(),
        ])
        .unwrap();

        let stats = Repository::diff_file_stats(&current, Some(&previous));
        let kinds: Vec<_> = stats
            .iter()
            .map(|s| (s.filename.as_str(), s.diff_kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("src/brand_new.rs", DiffKind::Added),
                ("src/gone.rs", DiffKind::Removed),
                ("src/new_name.rs", DiffKind::Renamed),
                ("src/same.rs", DiffKind::Unchanged),
                ("src/touched.rs", DiffKind::Modified),
            ]
        );

        let renamed = stats
            .iter()
            .find(|s| s.diff_kind == DiffKind::Renamed)
            .unwrap();
        assert_eq!(renamed.previous_name.as_deref(), Some("src/old_name.rs"));

        let removed = stats
            .iter()
            .find(|s| s.diff_kind == DiffKind::Removed)
            .unwrap();
        assert!(removed.current.is_none());
        assert!(removed.previous.is_some());

        // no previous list: everything is an addition
        let fresh = Repository::diff_file_stats(&current, None);
        assert!(fresh.iter().all(|s| s.diff_kind == DiffKind::Added));
    }
}
