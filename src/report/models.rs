/*!
 * Value types for the coverage object database.
 *
 * ## Data model overview
 *
 * ### [`Report`]
 * One coverage snapshot tied to a source-control commit. Reports form a
 * first-parent chain through `parent`, carry the commit metadata they were
 * taken against, and optionally list the [`Build`]s they are the union of.
 *
 * ### [`Build`]
 * A single tool's contribution to a report: its own file list, an add
 * timestamp, and an opaque JSON property set identifying the toolchain.
 *
 * ### [`Files`]
 * The ordered per-file table of a report or build. Each [`FileEntry`] points
 * at the source blob in the source-control repository, at a
 * [`LineCoverage`], and optionally at function and branch coverage.
 *
 * ### [`LineCoverage`]
 * A run-length compressed sequence of per-line hit counts; see [`LineCov`].
 *
 * ### [`FunctionCoverage`]
 * Per-function hit counts with mangled/demangled names and source ranges.
 *
 * ## Implementation notes
 *
 * Everything here is an owned, immutable value: objects reference each other
 * only by [`Oid`], so the object graph is acyclic by construction and values
 * can be passed between threads freely. All counters saturate at `u32::MAX`
 * rather than wrap; coverage numbers are large but never meaningfully exceed
 * that, and saturation keeps sums associative.
 */

use std::collections::BTreeMap;

use crate::{
    error::{CovError, Result},
    oid::Oid,
};

/// Saturating addition of two counters.
fn add_u32(lhs: u32, rhs: u32) -> u32 {
    lhs.saturating_add(rhs)
}

/// One dimension of coverage counters.
///
/// `total` counts every line (or function, or branch) including ones the tool
/// could not measure; `relevant` counts the measurable ones; `covered` counts
/// those with a non-zero hit count. `covered <= relevant <= total` holds for
/// every well-formed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageStats {
    pub total: u32,
    pub relevant: u32,
    pub covered: u32,
}

impl CoverageStats {
    pub fn new(total: u32, relevant: u32, covered: u32) -> CoverageStats {
        CoverageStats {
            total,
            relevant,
            covered,
        }
    }

    pub fn add(&mut self, rhs: &CoverageStats) {
        self.total = add_u32(self.total, rhs.total);
        self.relevant = add_u32(self.relevant, rhs.relevant);
        self.covered = add_u32(self.covered, rhs.covered);
    }

    /// Accumulates one RLE element: a null entry adds its run length to
    /// `total`, a hit-count entry bumps `total` and `relevant` and, when the
    /// count is non-zero, `covered`.
    pub fn add_line(&mut self, line: &LineCov) {
        if line.is_null {
            self.total = add_u32(self.total, line.value);
            return;
        }
        self.total = self.total.saturating_add(1);
        self.relevant = self.relevant.saturating_add(1);
        if line.value != 0 {
            self.covered = self.covered.saturating_add(1);
        }
    }

    /// Evaluates `covered / relevant` as a percentage with `digits` decimal
    /// places, rounding to nearest. Returns `(whole, fraction, divider)`
    /// where `divider` is `10^digits`. No relevant lines reports 0%; rating
    /// against marks is a separate concern, see [`Marks::rate`].
    pub fn percent(&self, digits: u8) -> (u32, u32, u32) {
        if self.relevant == 0 {
            return (0, 0, 1);
        }

        let mut divider = 1u64;
        for _ in 0..digits {
            divider *= 10;
        }
        let mut out = self.covered as u64 * 100 * divider;
        out += self.relevant as u64 / 2;
        out /= self.relevant as u64;

        (
            (out / divider) as u32,
            (out % divider) as u32,
            divider as u32,
        )
    }

    /// The coverage ratio as a reduced fraction; no relevant lines counts as
    /// fully covered.
    pub fn ratio(&self) -> Ratio {
        if self.relevant == 0 {
            Ratio::full()
        } else {
            Ratio::new(self.covered, self.relevant)
        }
    }
}

impl std::ops::Add for CoverageStats {
    type Output = CoverageStats;

    fn add(self, rhs: CoverageStats) -> CoverageStats {
        let mut out = self;
        CoverageStats::add(&mut out, &rhs);
        out
    }
}

impl std::ops::AddAssign for CoverageStats {
    fn add_assign(&mut self, rhs: CoverageStats) {
        self.add(&rhs);
    }
}

/// The three coverage dimensions carried by reports, builds and file entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageTotals {
    pub lines: CoverageStats,
    pub functions: CoverageStats,
    pub branches: CoverageStats,
}

impl CoverageTotals {
    pub fn add(&mut self, rhs: &CoverageTotals) {
        self.lines.add(&rhs.lines);
        self.functions.add(&rhs.functions);
        self.branches.add(&rhs.branches);
    }
}

impl std::ops::AddAssign for CoverageTotals {
    fn add_assign(&mut self, rhs: CoverageTotals) {
        self.add(&rhs);
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// A reduced fraction used for coverage thresholds and comparisons.
///
/// Ratios compare by cross-multiplication so `3/4 == 75/100` and ordering is
/// exact for any denominators.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    pub fn new(num: u32, den: u32) -> Ratio {
        debug_assert!(den != 0);
        let d = gcd(num, den);
        if d > 1 {
            Ratio {
                num: num / d,
                den: den / d,
            }
        } else {
            Ratio { num, den }
        }
    }

    /// 100%.
    pub fn full() -> Ratio {
        Ratio { num: 1, den: 1 }
    }

    pub fn from_percent(pct: u32) -> Ratio {
        Ratio::new(pct, 100)
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Ratio) -> bool {
        self.num as u64 * other.den as u64 == other.num as u64 * self.den as u64
    }
}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Ratio) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Ratio) -> std::cmp::Ordering {
        (self.num as u64 * other.den as u64).cmp(&(other.num as u64 * self.den as u64))
    }
}

/// Three-level classification of a coverage ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rating {
    Failing,
    Incomplete,
    #[default]
    Passing,
}

/// The `(incomplete, passing)` threshold pair a ratio is classified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marks {
    pub incomplete: Ratio,
    pub passing: Ratio,
}

impl Default for Marks {
    fn default() -> Marks {
        Marks {
            incomplete: Ratio::new(3, 4),
            passing: Ratio::new(9, 10),
        }
    }
}

impl Marks {
    /// Rates a single dimension. Stats with no relevant lines rate as 100%
    /// and therefore pass.
    pub fn rate(&self, stats: &CoverageStats) -> Rating {
        let ratio = stats.ratio();
        if ratio >= self.passing {
            Rating::Passing
        } else if ratio >= self.incomplete {
            Rating::Incomplete
        } else {
            Rating::Failing
        }
    }
}

/// One element of the line-coverage run-length encoding.
///
/// Serialised as a 32-bit word: the high bit is `is_null`, the low 31 bits
/// are `value`. A null element skips `value` consecutive non-relevant lines;
/// a non-null element is the next relevant line's hit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCov {
    pub is_null: bool,
    pub value: u32,
}

impl LineCov {
    pub const VALUE_MAX: u32 = 0x7FFF_FFFF;

    pub fn hits(value: u32) -> LineCov {
        LineCov {
            is_null: false,
            value,
        }
    }

    pub fn skip(value: u32) -> LineCov {
        LineCov {
            is_null: true,
            value,
        }
    }

    pub fn to_word(self) -> u32 {
        (self.value & Self::VALUE_MAX) | if self.is_null { 1 << 31 } else { 0 }
    }

    pub fn from_word(word: u32) -> LineCov {
        LineCov {
            is_null: word & (1 << 31) != 0,
            value: word & Self::VALUE_MAX,
        }
    }
}

/// A run-length compressed per-line hit-count sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineCoverage {
    pub lines: Vec<LineCov>,
}

impl LineCoverage {
    pub fn new(lines: Vec<LineCov>) -> LineCoverage {
        LineCoverage { lines }
    }

    /// Canonical encoder for a sparse `line -> hit count` map. Line numbers
    /// are 1-based.
    pub fn from_map(map: &BTreeMap<u32, u32>) -> LineCoverage {
        let mut lines = Vec::with_capacity(map.len());
        let mut next_line = 1u32;
        for (&line_no, &hits) in map {
            if line_no > next_line {
                lines.push(LineCov::skip(line_no - next_line));
            }
            lines.push(LineCov::hits(hits));
            next_line = line_no + 1;
        }
        LineCoverage { lines }
    }

    /// Reconstructs the sparse `line -> hit count` map. Fails with
    /// `BadSyntax` if the implied line number would overflow 2^31-1.
    pub fn to_map(&self) -> Result<BTreeMap<u32, u32>> {
        let mut map = BTreeMap::new();
        let mut line_no = 1u32;
        for cov in &self.lines {
            if cov.is_null {
                line_no = line_no
                    .checked_add(cov.value)
                    .filter(|&n| n <= LineCov::VALUE_MAX)
                    .ok_or(CovError::BadSyntax)?;
            } else {
                if line_no > LineCov::VALUE_MAX {
                    return Err(CovError::BadSyntax);
                }
                map.insert(line_no, cov.value);
                line_no += 1;
            }
        }
        Ok(map)
    }

    /// Line-dimension statistics implied by the sequence.
    pub fn stats(&self) -> CoverageStats {
        let mut out = CoverageStats::default();
        for line in &self.lines {
            out.add_line(line);
        }
        out
    }
}

/// One coverage snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Report {
    /// Previous report on the same chain, or zero for the first one.
    pub parent: Oid,

    /// The [`Files`] object listing per-file data.
    pub file_list: Oid,

    /// The source-control commit this snapshot was taken against.
    pub commit: Oid,

    /// When the report was added, in seconds since epoch, UTC.
    pub added: u64,

    pub stats: CoverageTotals,

    /// When `commit` was committed, in seconds since epoch, UTC.
    pub commit_time: u64,

    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub message: String,

    /// The [`Build`]s this report is the union of; may be empty for reports
    /// recorded from a single source.
    pub builds: Vec<Oid>,
}

/// A single tool's contribution to a report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Build {
    pub file_list: Oid,

    /// When the build was added, in seconds since epoch, UTC.
    pub added: u64,

    pub stats: CoverageTotals,

    /// Opaque JSON properties describing the toolchain. Stored normalised
    /// (see [`normalize_propset`]) so equal property sets hash equally.
    pub propset: String,
}

impl Build {
    pub fn new(file_list: Oid, added: u64, propset: &str, stats: CoverageTotals) -> Build {
        Build {
            file_list,
            added,
            stats,
            propset: normalize_propset(propset),
        }
    }
}

/// Normalises a JSON property set for stable content addressing: parsed and
/// re-emitted compactly with object keys sorted. Text that does not parse as
/// JSON is kept verbatim, trimmed.
pub fn normalize_propset(props_json: &str) -> String {
    // serde_json's default map is ordered by key, so a parse/print round
    // trip sorts every object in the tree.
    match serde_json::from_str::<serde_json::Value>(props_json) {
        Ok(value) => value.to_string(),
        Err(_) => props_json.trim().to_string(),
    }
}

/// Per-file record inside a [`Files`] object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileEntry {
    /// Path relative to the worktree root. Entries are ordered by it.
    pub path: String,

    /// The measured file came from the working directory, not the index.
    pub is_dirty: bool,

    /// The working-directory file was not the one tested.
    pub is_modified: bool,

    pub stats: CoverageTotals,

    /// Source blob in the source-control repository.
    pub contents: Oid,

    pub line_coverage: Oid,

    /// Zero when the report carries no function data for this file.
    pub function_coverage: Oid,

    /// Zero when the report carries no branch data for this file.
    pub branch_coverage: Oid,
}

impl FileEntry {
    pub fn build() -> FileEntryBuilder {
        FileEntryBuilder::default()
    }

    pub fn has_function_coverage(&self) -> bool {
        !self.function_coverage.is_zero()
    }

    pub fn has_branch_coverage(&self) -> bool {
        !self.branch_coverage.is_zero()
    }
}

#[derive(Debug, Default)]
pub struct FileEntryBuilder {
    entry: FileEntry,
}

impl FileEntryBuilder {
    pub fn path(mut self, path: &str) -> Self {
        self.entry.path = path.into();
        self
    }

    pub fn dirty(mut self, value: bool) -> Self {
        self.entry.is_dirty = value;
        self
    }

    pub fn modified(mut self, value: bool) -> Self {
        self.entry.is_modified = value;
        self
    }

    pub fn stats(mut self, stats: CoverageTotals) -> Self {
        self.entry.stats = stats;
        self
    }

    pub fn line_stats(mut self, total: u32, relevant: u32, covered: u32) -> Self {
        self.entry.stats.lines = CoverageStats::new(total, relevant, covered);
        self
    }

    pub fn contents(mut self, oid: Oid) -> Self {
        self.entry.contents = oid;
        self
    }

    pub fn line_coverage(mut self, oid: Oid) -> Self {
        self.entry.line_coverage = oid;
        self
    }

    pub fn function_coverage(mut self, oid: Oid) -> Self {
        self.entry.function_coverage = oid;
        self
    }

    pub fn branch_coverage(mut self, oid: Oid) -> Self {
        self.entry.branch_coverage = oid;
        self
    }

    pub fn create(self) -> FileEntry {
        self.entry
    }
}

/// The ordered file table of a report or build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Files {
    entries: Vec<FileEntry>,
}

impl Files {
    /// Creates a file list, sorting entries by path. Duplicate paths are
    /// rejected with `BadSyntax`.
    pub fn new(mut entries: Vec<FileEntry>) -> Result<Files> {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        for pair in entries.windows(2) {
            if pair[0].path == pair[1].path {
                return Err(CovError::BadSyntax);
            }
        }
        Ok(Files { entries })
    }

    /// Wraps entries already known to be ordered and unique (the codec path).
    pub(crate) fn from_ordered(entries: Vec<FileEntry>) -> Files {
        Files { entries }
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn by_path(&self, path: &str) -> Option<&FileEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// One function record inside a [`FunctionCoverage`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Function {
    /// Link-time (mangled) name.
    pub name: String,

    /// Human-readable name; may equal `name` for C-style symbols.
    pub demangled_name: String,

    pub count: u32,

    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// Per-function hit counts for one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionCoverage {
    pub functions: Vec<Function>,
}

impl FunctionCoverage {
    pub fn new(functions: Vec<Function>) -> FunctionCoverage {
        FunctionCoverage { functions }
    }

    /// Function-dimension statistics implied by the records.
    pub fn stats(&self) -> CoverageStats {
        let mut out = CoverageStats::default();
        for function in &self.functions {
            out.total = out.total.saturating_add(1);
            out.relevant = out.relevant.saturating_add(1);
            if function.count != 0 {
                out.covered = out.covered.saturating_add(1);
            }
        }
        out
    }
}

/// Assembles a [`Report`] from per-build contributions.
///
/// Stats roll up with saturation; build ids are recorded in insertion order.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: Report,
}

impl ReportBuilder {
    pub fn new() -> ReportBuilder {
        ReportBuilder::default()
    }

    pub fn parent(mut self, oid: Oid) -> Self {
        self.report.parent = oid;
        self
    }

    pub fn file_list(mut self, oid: Oid) -> Self {
        self.report.file_list = oid;
        self
    }

    pub fn commit(mut self, oid: Oid, branch: &str, commit_time: u64) -> Self {
        self.report.commit = oid;
        self.report.branch = branch.into();
        self.report.commit_time = commit_time;
        self
    }

    pub fn author(mut self, name: &str, email: &str) -> Self {
        self.report.author_name = name.into();
        self.report.author_email = email.into();
        self
    }

    pub fn committer(mut self, name: &str, email: &str) -> Self {
        self.report.committer_name = name.into();
        self.report.committer_email = email.into();
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.report.message = message.into();
        self
    }

    pub fn added(mut self, added: u64) -> Self {
        self.report.added = added;
        self
    }

    pub fn stats(mut self, stats: CoverageTotals) -> Self {
        self.report.stats = stats;
        self
    }

    /// Records a stored build as part of this report and rolls its stats
    /// into the report's.
    pub fn add_build(mut self, oid: Oid, build: &Build) -> Self {
        self.report.builds.push(oid);
        self.report.stats.add(&build.stats);
        self
    }

    pub fn create(self) -> Report {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_saturate() {
        let a = CoverageStats::new(u32::MAX - 1, 10, 5);
        let b = CoverageStats::new(5, u32::MAX, 1);
        let sum = a + b;
        assert_eq!(sum.total, u32::MAX);
        assert_eq!(sum.relevant, u32::MAX);
        assert_eq!(sum.covered, 6);

        // commutative under saturation
        assert_eq!(a + b, b + a);
    }

    #[test]
    fn test_stats_associative() {
        let a = CoverageStats::new(u32::MAX - 5, 1, 0);
        let b = CoverageStats::new(3, 2, 1);
        let c = CoverageStats::new(100, 3, 2);
        assert_eq!((a + b) + c, a + (b + c));
    }

    #[test]
    fn test_percent_rounds_to_nearest() {
        let stats = CoverageStats::new(10, 3, 2);
        // 2/3 = 66.67%
        assert_eq!(stats.percent(2), (66, 67, 100));
        let stats = CoverageStats::new(10, 0, 0);
        assert_eq!(stats.percent(2), (0, 0, 1));
    }

    #[test]
    fn test_ratio_cross_multiplication() {
        assert_eq!(Ratio::new(3, 4), Ratio::new(75, 100));
        assert!(Ratio::new(2, 3) < Ratio::new(3, 4));
        assert!(Ratio::new(9, 10) > Ratio::new(89, 100));
    }

    #[test]
    fn test_marks_rate() {
        let marks = Marks::default();
        assert_eq!(marks.rate(&CoverageStats::new(10, 10, 10)), Rating::Passing);
        assert_eq!(
            marks.rate(&CoverageStats::new(10, 10, 8)),
            Rating::Incomplete
        );
        assert_eq!(marks.rate(&CoverageStats::new(10, 10, 2)), Rating::Failing);
        // no relevant lines counts as 100%
        assert_eq!(marks.rate(&CoverageStats::new(10, 0, 0)), Rating::Passing);
    }

    #[test]
    fn test_line_coverage_rle_scenario() {
        // {1: 5, 2: 0, 10: 3}, lines 3-9 not relevant
        let map = BTreeMap::from([(1, 5), (2, 0), (10, 3)]);
        let coverage = LineCoverage::from_map(&map);
        assert_eq!(
            coverage.lines,
            vec![
                LineCov::hits(5),
                LineCov::hits(0),
                LineCov::skip(7),
                LineCov::hits(3),
            ]
        );
        assert_eq!(coverage.to_map().unwrap(), map);
        assert_eq!(coverage.stats(), CoverageStats::new(10, 3, 2));
    }

    #[test]
    fn test_line_coverage_word_packing() {
        let skip = LineCov::skip(7);
        assert_eq!(skip.to_word(), 0x8000_0007);
        assert_eq!(LineCov::from_word(0x8000_0007), skip);
        let hits = LineCov::hits(5);
        assert_eq!(hits.to_word(), 5);
        assert_eq!(LineCov::from_word(5), hits);
    }

    #[test]
    fn test_line_coverage_overflow_rejected() {
        let coverage = LineCoverage::new(vec![
            LineCov::skip(LineCov::VALUE_MAX),
            LineCov::skip(LineCov::VALUE_MAX),
            LineCov::hits(1),
        ]);
        assert!(matches!(coverage.to_map(), Err(CovError::BadSyntax)));
    }

    #[test]
    fn test_files_ordered_and_unique() {
        let entries = vec![
            FileEntry::build().path("src/b.rs").create(),
            FileEntry::build().path("src/a.rs").create(),
        ];
        let files = Files::new(entries).unwrap();
        assert_eq!(files.entries()[0].path, "src/a.rs");
        assert!(files.by_path("src/b.rs").is_some());
        assert!(files.by_path("src/c.rs").is_none());

        let dup = vec![
            FileEntry::build().path("src/a.rs").create(),
            FileEntry::build().path("src/a.rs").create(),
        ];
        assert!(Files::new(dup).is_err());
    }

    #[test]
    fn test_normalize_propset_sorts_keys() {
        assert_eq!(
            normalize_propset(r#"{ "os": "linux", "compiler": "gcc" }"#),
            r#"{"compiler":"gcc","os":"linux"}"#
        );
        assert_eq!(normalize_propset("  not json  "), "not json");
    }

    #[test]
    fn test_report_builder_rolls_up_builds() {
        let build = Build::new(
            Oid::ZERO,
            100,
            "{}",
            CoverageTotals {
                lines: CoverageStats::new(10, 8, 6),
                ..Default::default()
            },
        );
        let oid = Oid::from_hex("abcdef0123456789abcdef0123456789abcdef01").unwrap();
        let report = ReportBuilder::new()
            .added(200)
            .add_build(oid, &build)
            .create();
        assert_eq!(report.builds, vec![oid]);
        assert_eq!(report.stats.lines, CoverageStats::new(10, 8, 6));
    }
}
