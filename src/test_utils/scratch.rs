//! A throwaway on-disk repository plus factories for the object graphs the
//! tests keep rebuilding.

use std::path::Path;

use tempfile::TempDir;

use crate::{
    oid::Oid,
    report::{
        CoverageStats, CoverageTotals, FileEntry, Files, LineCov, LineCoverage, Object, Report,
    },
    repository::{InitOptions, Repository},
};

pub struct ScratchRepo {
    temp_dir: TempDir,
    repo: Repository,
}

impl Default for ScratchRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchRepo {
    pub fn new() -> ScratchRepo {
        let temp_dir = TempDir::new().ok().unwrap();
        let repo = Repository::init(
            temp_dir.path(),
            Path::new("../.git"),
            InitOptions::default(),
        )
        .unwrap();
        ScratchRepo { temp_dir, repo }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn worktree(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a small `files` object (one covered file) and returns its id.
    pub fn sample_file_list(&self, seed: u32) -> Oid {
        let coverage = LineCoverage::new(vec![
            LineCov::hits(seed + 1),
            LineCov::skip(2),
            LineCov::hits(0),
        ]);
        let line_oid = self.repo.write(&Object::LineCoverage(coverage.clone())).unwrap();

        let files = Files::new(vec![FileEntry::build()
            .path("src/main.rs")
            .stats(CoverageTotals {
                lines: coverage.stats(),
                ..Default::default()
            })
            .line_coverage(line_oid)
            .create()])
        .unwrap();
        self.repo.write(&Object::Files(files)).unwrap()
    }

    /// Writes one report in a chain; `sequence` keeps sibling chains from
    /// colliding on content.
    pub fn write_report(&self, parent: Oid, branch: &str, sequence: u32) -> Oid {
        let report = Report {
            parent,
            file_list: self.sample_file_list(sequence),
            commit: Oid::ZERO,
            added: 1_660_000_000 + sequence as u64,
            stats: CoverageTotals {
                lines: CoverageStats::new(3, 2, 1),
                ..Default::default()
            },
            commit_time: 1_650_000_000 + sequence as u64,
            branch: branch.to_string(),
            author_name: "Johnny Appleseed".into(),
            author_email: "johnny@appleseed.com".into(),
            committer_name: "Johnny Appleseed".into(),
            committer_email: "johnny@appleseed.com".into(),
            message: format!("{branch} report #{sequence}"),
            builds: Vec::new(),
        };
        self.repo.write(&Object::Report(report)).unwrap()
    }

    /// Builds a first-parent chain of `count` reports on `branch`, pointing
    /// the branch (and `HEAD`) at its tip. Returns oldest-first.
    pub fn commit_chain(&self, branch: &str, count: u32) -> Vec<Oid> {
        let chain = self.commit_chain_from(branch, Oid::ZERO, count);
        self.repo.refs().set_head(branch).unwrap();
        chain
    }

    /// Like [`ScratchRepo::commit_chain`] but growing from `parent` and
    /// leaving `HEAD` alone.
    pub fn commit_chain_from(&self, branch: &str, parent: Oid, count: u32) -> Vec<Oid> {
        let mut chain = Vec::with_capacity(count as usize);
        let mut parent = parent;
        for sequence in 0..count {
            parent = self.write_report(parent, branch, sequence);
            chain.push(parent);
        }
        if let Some(&tip) = chain.last() {
            self.repo
                .refs()
                .create(&format!("refs/heads/{branch}"), tip, true)
                .unwrap();
        }
        chain
    }
}
