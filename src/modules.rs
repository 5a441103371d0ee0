//! The modules overlay: named groups of path prefixes layered over a file
//! list for reporting.
//!
//! The overlay lives in config form (the repository `modules` file or a
//! `.covmodule` blob in the host repository): `[module.sep] value = "/"`
//! sets the display separator and each `[module "<name>"] path = <prefix>`
//! multivar enumerates one module's prefixes. Order is preserved so a
//! user-edited file round-trips with minimal churn.

use crate::{
    config::ConfigFile,
    error::Result,
    oid::Oid,
    report::FileEntry,
    scm::Scm,
};

const SEP_KEY: &str = "module.sep.value";
// the `[module] sep = …` spelling of the same setting
const SEP_KEY_SHORT: &str = "module.sep";

/// One named module: a name plus the path prefixes that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    pub name: String,
    pub prefixes: Vec<String>,
}

/// Outcome of an overlay mutation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModStatus {
    /// No change was required.
    Unmodified,
    /// The in-memory image changed; the caller must flush it.
    NeedsUpdate,
    /// The path is already listed for that module.
    Duplicate,
    /// No module of that name exists.
    NoModule,
}

/// One module's slice of a file list; `name` is `None` for the unassigned
/// bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleView<'m, 'f> {
    pub name: Option<&'m str>,
    pub items: Vec<&'f FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Modules {
    separator: String,
    entries: Vec<ModuleInfo>,
}

impl Modules {
    pub fn new(separator: &str, entries: Vec<ModuleInfo>) -> Modules {
        Modules {
            separator: separator.to_string(),
            entries,
        }
    }

    /// Reads the overlay out of a parsed config image.
    pub fn from_config(cfg: &ConfigFile) -> Modules {
        let mut separator = String::new();
        let mut entries: Vec<ModuleInfo> = Vec::new();
        for (key, value) in cfg.entries() {
            if key == SEP_KEY || key == SEP_KEY_SHORT {
                separator = value;
                continue;
            }
            let Some(name) = key
                .strip_prefix("module.")
                .and_then(|rest| rest.strip_suffix(".path"))
            else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            match entries.iter_mut().find(|entry| entry.name == name) {
                Some(entry) => entry.prefixes.push(value),
                None => entries.push(ModuleInfo {
                    name: name.to_string(),
                    prefixes: vec![value],
                }),
            }
        }
        Modules { separator, entries }
    }

    /// Reads the overlay from the `.covmodule` blob of a commit in the host
    /// repository.
    pub fn from_commit(scm: &dyn Scm, commit: Oid) -> Result<Modules> {
        let info = scm.lookup_commit(commit)?;
        let blob_oid = scm.tree_entry_bypath(info.tree, ".covmodule")?;
        let bytes = scm.lookup_blob(blob_oid)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Modules::from_config(&ConfigFile::from_text(&text)?))
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn entries(&self) -> &[ModuleInfo] {
        &self.entries
    }

    pub fn set_separator(&mut self, sep: &str) -> ModStatus {
        if sep == self.separator {
            return ModStatus::Unmodified;
        }
        self.separator = sep.to_string();
        ModStatus::NeedsUpdate
    }

    pub fn add(&mut self, module: &str, path: &str) -> ModStatus {
        for entry in &mut self.entries {
            if entry.name != module {
                continue;
            }
            if entry.prefixes.iter().any(|prefix| prefix == path) {
                return ModStatus::Duplicate;
            }
            entry.prefixes.push(path.to_string());
            return ModStatus::NeedsUpdate;
        }
        self.entries.push(ModuleInfo {
            name: module.to_string(),
            prefixes: vec![path.to_string()],
        });
        ModStatus::NeedsUpdate
    }

    /// Removes one path from a module; a module left with no paths is
    /// removed from the list.
    pub fn remove(&mut self, module: &str, path: &str) -> ModStatus {
        let Some(index) = self.entries.iter().position(|entry| entry.name == module) else {
            return ModStatus::NoModule;
        };

        let mut result = ModStatus::Unmodified;
        let entry = &mut self.entries[index];
        if let Some(path_index) = entry.prefixes.iter().position(|prefix| prefix == path) {
            entry.prefixes.remove(path_index);
            result = ModStatus::NeedsUpdate;
        }

        if entry.prefixes.is_empty() {
            self.entries.remove(index);
            result = ModStatus::NeedsUpdate;
        }
        result
    }

    pub fn remove_all(&mut self, module: &str) -> ModStatus {
        let Some(index) = self.entries.iter().position(|entry| entry.name == module) else {
            return ModStatus::Unmodified;
        };
        self.entries.remove(index);
        ModStatus::NeedsUpdate
    }

    /// Rewrites the overlay's entries in `cfg` and commits it: all
    /// `module.sep` / `module.<name>.path` entries are dropped, the current
    /// image is written back, and sections left empty are cleaned away.
    pub fn dump(&self, cfg: &mut ConfigFile) -> Result<()> {
        cfg.delete_matching(|key| {
            key == SEP_KEY
                || key == SEP_KEY_SHORT
                || (key.starts_with("module.") && key.ends_with(".path"))
        });

        if !self.separator.is_empty() {
            cfg.set_string(SEP_KEY, &self.separator)?;
        }
        for entry in &self.entries {
            for prefix in &entry.prefixes {
                cfg.add_multivar(&format!("module.{}.path", entry.name), prefix)?;
            }
        }

        cfg.cleanup();
        cfg.save()
    }

    /// Groups a file list into per-module views plus a trailing unassigned
    /// bucket; views that match nothing are dropped. A file may appear in
    /// several views when prefixes overlap.
    pub fn filter<'m, 'f>(&'m self, files: &'f [FileEntry]) -> Vec<ModuleView<'m, 'f>> {
        let mut result: Vec<ModuleView<'m, 'f>> = self
            .entries
            .iter()
            .map(|entry| ModuleView {
                name: Some(entry.name.as_str()),
                items: Vec::new(),
            })
            .collect();
        result.push(ModuleView {
            name: None,
            items: Vec::new(),
        });

        for file in files {
            let mut found = false;
            for (view, entry) in result.iter_mut().zip(&self.entries) {
                if !prefixes_contain(&entry.prefixes, &file.path) {
                    continue;
                }
                view.items.push(file);
                found = true;
            }
            if !found {
                if let Some(unassigned) = result.last_mut() {
                    unassigned.items.push(file);
                }
            }
        }

        result.retain(|view| !view.items.is_empty());
        result
    }

    /// Whether `path` belongs to the module named `module`.
    pub fn assigns(&self, module: &str, path: &str) -> bool {
        self.entries
            .iter()
            .filter(|entry| entry.name == module)
            .any(|entry| prefixes_contain(&entry.prefixes, path))
    }
}

fn prefixes_contain(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|prefix| prefix_contains(prefix, path))
}

/// A prefix matches a path when equal, or when it names a proper directory
/// prefix: `src` matches `src/a.c` but not `source/a.c`.
pub(crate) fn prefix_contains(prefix: &str, path: &str) -> bool {
    if prefix.len() > path.len() {
        return false;
    }
    if prefix.len() == path.len() {
        return prefix == path;
    }
    if !path.starts_with(prefix) {
        return false;
    }
    (!prefix.is_empty() && prefix.ends_with('/')) || path.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::report::FileEntry;

    const SAMPLE: &str = r#"[module.sep]
  value = "/"
[module "core"]
  path = "src/core"
  path = "include/core"
[module "tests"]
  path = "tests"
"#;

    fn sample() -> Modules {
        Modules::from_config(&ConfigFile::from_text(SAMPLE).unwrap())
    }

    #[test]
    fn test_from_config() {
        let mods = sample();
        assert_eq!(mods.separator(), "/");
        assert_eq!(
            mods.entries(),
            &[
                ModuleInfo {
                    name: "core".into(),
                    prefixes: vec!["src/core".into(), "include/core".into()],
                },
                ModuleInfo {
                    name: "tests".into(),
                    prefixes: vec!["tests".into()],
                },
            ]
        );
    }

    #[test]
    fn test_alternate_sep_spelling() {
        let mods = Modules::from_config(&ConfigFile::from_text("[module]\nsep = \"::\"\n").unwrap());
        assert_eq!(mods.separator(), "::");
    }

    #[test]
    fn test_dump_round_trips() {
        let temp_dir = TempDir::new().ok().unwrap();
        let path = temp_dir.path().join("modules");
        std::fs::write(&path, SAMPLE).unwrap();

        let mods = sample();
        let mut cfg = ConfigFile::open(&path).unwrap();
        mods.dump(&mut cfg).unwrap();

        let reparsed = Modules::from_config(&ConfigFile::open(&path).unwrap());
        assert_eq!(reparsed, mods);
    }

    #[test]
    fn test_add_remove() {
        let mut mods = sample();

        assert_eq!(mods.add("core", "src/core"), ModStatus::Duplicate);
        assert_eq!(mods.add("core", "src/core2"), ModStatus::NeedsUpdate);
        assert_eq!(mods.add("docs", "docs"), ModStatus::NeedsUpdate);
        assert_eq!(mods.entries().last().unwrap().name, "docs");

        assert_eq!(mods.remove("nope", "x"), ModStatus::NoModule);
        assert_eq!(mods.remove("core", "not-there"), ModStatus::Unmodified);

        // draining a module removes it from the list
        assert_eq!(mods.remove("core", "include/core"), ModStatus::NeedsUpdate);
        assert_eq!(mods.remove("core", "src/core2"), ModStatus::NeedsUpdate);
        assert_eq!(mods.remove("core", "src/core"), ModStatus::NeedsUpdate);
        assert!(mods.entries().iter().all(|entry| entry.name != "core"));

        assert_eq!(mods.remove_all("tests"), ModStatus::NeedsUpdate);
        assert_eq!(mods.remove_all("tests"), ModStatus::Unmodified);
    }

    #[test]
    fn test_set_separator() {
        let mut mods = sample();
        assert_eq!(mods.set_separator("/"), ModStatus::Unmodified);
        assert_eq!(mods.set_separator("::"), ModStatus::NeedsUpdate);
        assert_eq!(mods.separator(), "::");
    }

    #[test]
    fn test_prefix_containment() {
        assert!(prefix_contains("src", "src/a.c"));
        assert!(prefix_contains("src/", "src/a.c"));
        assert!(prefix_contains("src/a.c", "src/a.c"));
        assert!(!prefix_contains("src", "source/a.c"));
        assert!(!prefix_contains("src/a.c", "src/a"));
        assert!(!prefix_contains("src/a", "src/a.c"));
    }

    #[test]
    fn test_filter_views() {
        let mods = Modules::from_config(
            &ConfigFile::from_text(
                "[module \"core\"]\npath = \"src\"\n[module \"all\"]\npath = \"src\"\npath = \"tests\"\n",
            )
            .unwrap(),
        );
        let files = vec![
            FileEntry::build().path("src/a.c").create(),
            FileEntry::build().path("tests/t.c").create(),
            FileEntry::build().path("README.md").create(),
        ];

        let views = mods.filter(&files);
        assert_eq!(views.len(), 3);

        assert_eq!(views[0].name, Some("core"));
        assert_eq!(views[0].items.len(), 1);
        assert_eq!(views[0].items[0].path, "src/a.c");

        // a file may appear in several module views, once per view
        assert_eq!(views[1].name, Some("all"));
        let all_paths: Vec<_> = views[1].items.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(all_paths, vec!["src/a.c", "tests/t.c"]);

        // unmatched files land only in the unassigned bucket
        assert_eq!(views[2].name, None);
        assert_eq!(views[2].items.len(), 1);
        assert_eq!(views[2].items[0].path, "README.md");
    }

    #[test]
    fn test_from_commit() {
        use crate::{error::CovError, scm::TreeEntry, test_utils::fake_scm::FakeScm};

        let mut scm = FakeScm::default();
        let blob = scm.add_blob(SAMPLE.as_bytes());
        let tree = scm.add_tree(vec![TreeEntry {
            name: ".covmodule".into(),
            oid: blob,
            is_tree: false,
        }]);
        let commit = scm.add_commit(tree, "add overlay");

        let mods = Modules::from_commit(&scm, commit).unwrap();
        assert_eq!(mods, sample());

        let bare_tree = scm.add_tree(Vec::new());
        let bare_commit = scm.add_commit(bare_tree, "no overlay");
        assert!(matches!(
            Modules::from_commit(&scm, bare_commit),
            Err(CovError::NotFound)
        ));
    }

    #[test]
    fn test_filter_drops_empty_views() {
        let mods = Modules::from_config(
            &ConfigFile::from_text("[module \"ghost\"]\npath = \"nowhere\"\n").unwrap(),
        );
        let files = vec![FileEntry::build().path("src/a.c").create()];
        let views = mods.filter(&files);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, None);
    }
}
