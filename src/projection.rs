//! Projection: the aggregated, rated view of a report filtered by module
//! and/or path prefix.
//!
//! Projection happens in two steps. [`ReportFilter::project`] restricts a
//! per-file statistics list by module and path prefix and groups what
//! remains into directory/file/module entries with summed stats.
//! [`calc_stats`] and [`project`] then turn those entries into a rated
//! table: a column set, lexicographically ordered rows, and a footer equal
//! to the saturating sum of the data rows.

use std::collections::BTreeMap;

use crate::{
    modules::{prefix_contains, Modules},
    oid::Oid,
    report::{CoverageStats, CoverageTotals, Marks, Rating},
};

/// Per-file coverage in one snapshot: the stats plus the source blob id
/// (used for rename detection).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileCoverage {
    pub stats: CoverageTotals,
    pub contents: Oid,
}

/// How a file changed between the previous and current report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffKind {
    #[default]
    Unchanged,
    Added,
    Renamed,
    Modified,
    Removed,
}

/// One file's "current" and "previous" statistics, the projection input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileStats {
    pub filename: String,
    pub current: Option<FileCoverage>,
    pub previous: Option<FileCoverage>,
    pub previous_name: Option<String>,
    pub diff_kind: DiffKind,
}

/// A display name plus the full (expanded) path it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Label {
    pub display: String,
    pub expanded: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// The whole projection is this one file.
    StandaloneFile,
    File,
    Directory,
    Module,
}

/// Current and previous stats summed over an entry's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStats {
    pub current: CoverageTotals,
    pub previous: CoverageTotals,
}

impl EntryStats {
    pub fn extend(&mut self, rhs: &EntryStats) {
        self.current.add(&rhs.current);
        self.previous.add(&rhs.previous);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub entry_type: EntryType,
    pub name: Label,
    pub stats: EntryStats,
    pub previous_name: Option<String>,
    pub diff_kind: DiffKind,
}

/// A filter string plus the directory-prefix form used for matching:
/// `src` and `src/` both match everything under `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefixed {
    filter: String,
    prefix: String,
}

impl Prefixed {
    pub fn new(filter_value: &str, sep: &str) -> Prefixed {
        let mut filter = filter_value.to_string();
        let mut prefix = filter.clone();
        if filter.ends_with(sep) {
            filter.truncate(filter.len() - sep.len());
        } else if !prefix.is_empty() {
            prefix.push_str(sep);
        }
        Prefixed { filter, prefix }
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    pub fn prefixes(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) || name == self.filter
    }

    /// The remainder of `name` beyond the prefix; `None` when it does not
    /// match.
    fn remainder<'n>(&self, name: &'n str) -> Option<&'n str> {
        if name == self.filter {
            Some("")
        } else {
            name.strip_prefix(&self.prefix)
        }
    }

    pub fn apply_to(&self, name: &str) -> String {
        if name.is_empty() {
            self.filter.clone()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}

/// The module and path restriction applied to one projection.
pub struct ReportFilter<'m> {
    modules: Option<&'m Modules>,
    sep: String,
    module: Prefixed,
    fname: Prefixed,
}

impl<'m> ReportFilter<'m> {
    pub fn new(modules: Option<&'m Modules>, module_filter: &str, fname_filter: &str) -> Self {
        let sep = modules
            .map(Modules::separator)
            .filter(|sep| !sep.is_empty())
            .unwrap_or("/")
            .to_string();
        ReportFilter {
            modules,
            module: Prefixed::new(module_filter, &sep),
            fname: Prefixed::new(fname_filter, "/"),
            sep,
        }
    }

    pub fn project(&self, report: &[FileStats]) -> Vec<Entry> {
        let in_fname: Vec<&FileStats> = report
            .iter()
            .filter(|file| self.fname.prefixes(&file.filename))
            .collect();

        if let (Some(mods), false) = (self.modules, self.module.is_empty()) {
            let matching: Vec<_> = mods
                .entries()
                .iter()
                .filter(|entry| self.module.prefixes(&entry.name))
                .collect();
            if matching.is_empty() {
                return Vec::new();
            }

            let files_of = |names: &[&str]| {
                in_fname
                    .iter()
                    .copied()
                    .filter(|file| {
                        names.iter().any(|name| mods.assigns(name, &file.filename))
                    })
                    .collect::<Vec<_>>()
            };

            // the filter pins down module leaves: group their files by path
            if matching.iter().all(|entry| entry.name == self.module.filter) {
                let names: Vec<&str> = matching.iter().map(|e| e.name.as_str()).collect();
                return self.project_paths(&files_of(&names));
            }

            // otherwise group by the next module-name segment
            let mut keys: BTreeMap<String, Vec<&str>> = BTreeMap::new();
            for entry in &matching {
                let rest = self.module.remainder(&entry.name).unwrap_or("");
                let key = rest.split(&self.sep).next().unwrap_or("").to_string();
                keys.entry(key).or_default().push(entry.name.as_str());
            }

            let mut out = Vec::new();
            for (key, names) in &keys {
                let files = files_of(names);
                if files.is_empty() {
                    continue;
                }
                let mut stats = EntryStats::default();
                for file in &files {
                    accumulate(&mut stats, file);
                }
                out.push(Entry {
                    entry_type: EntryType::Module,
                    name: Label {
                        display: if key.is_empty() {
                            self.module.filter.clone()
                        } else {
                            key.clone()
                        },
                        expanded: self.module.apply_to(key),
                    },
                    stats,
                    previous_name: None,
                    diff_kind: DiffKind::Unchanged,
                });
            }
            out.sort_by(|a, b| a.name.expanded.cmp(&b.name.expanded));
            return out;
        }

        self.project_paths(&in_fname)
    }

    /// Groups files by the next path segment beyond the prefix.
    fn project_paths(&self, files: &[&FileStats]) -> Vec<Entry> {
        let mut groups: BTreeMap<String, Vec<&FileStats>> = BTreeMap::new();
        let mut is_leaf: BTreeMap<String, bool> = BTreeMap::new();

        for file in files {
            let Some(rest) = self.fname.remainder(&file.filename) else {
                continue;
            };
            let (key, leaf) = match rest.split_once('/') {
                Some((segment, _)) => (segment.to_string(), false),
                None => (rest.to_string(), true),
            };
            groups.entry(key.clone()).or_default().push(file);
            is_leaf.insert(key, leaf);
        }

        let mut out = Vec::new();
        for (key, members) in &groups {
            let mut stats = EntryStats::default();
            for file in members {
                accumulate(&mut stats, file);
            }
            let leaf_file = members.len() == 1 && is_leaf[key];
            if leaf_file {
                let file = members[0];
                out.push(Entry {
                    entry_type: EntryType::File,
                    name: Label {
                        display: if key.is_empty() {
                            file.filename.clone()
                        } else {
                            key.clone()
                        },
                        expanded: file.filename.clone(),
                    },
                    stats,
                    previous_name: file.previous_name.clone(),
                    diff_kind: file.diff_kind,
                });
            } else {
                out.push(Entry {
                    entry_type: EntryType::Directory,
                    name: Label {
                        display: key.clone(),
                        expanded: self.fname.apply_to(key),
                    },
                    stats,
                    previous_name: None,
                    diff_kind: DiffKind::Unchanged,
                });
            }
        }

        out.sort_by(|a, b| a.name.expanded.cmp(&b.name.expanded));
        if out.len() == 1 && out[0].entry_type == EntryType::File {
            out[0].entry_type = EntryType::StandaloneFile;
        }
        out
    }
}

fn accumulate(stats: &mut EntryStats, file: &FileStats) {
    if let Some(current) = &file.current {
        stats.current.add(&current.stats);
    }
    if let Some(previous) = &file.previous {
        stats.previous.add(&previous.stats);
    }
}

/* The rated table. */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColTitle {
    BranchesCovered,
    BranchesMissing,
    BranchesRelevant,
    FunctionsCovered,
    FunctionsMissing,
    FunctionsRelevant,
    LinesCovered,
    LinesMissing,
    LinesRelevant,
    LinesTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColPriority {
    Supplemental,
    Key,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColData {
    Percentage,
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    pub title: ColTitle,
    pub priority: ColPriority,
    pub data_type: ColData,
}

/// One rendered cell: the value, the signed change against the previous
/// report, and the rating the value classifies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellInfo {
    pub value: String,
    pub change: String,
    pub category: Rating,
    pub change_is_negative: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowInfo {
    pub entry_type: EntryType,
    pub name: Label,
    pub data: Vec<CellInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedEntries {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<RowInfo>,
    pub footer: Vec<CellInfo>,
}

/// Which optional dimensions the projection carries data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct With {
    pub functions: bool,
    pub branches: bool,
}

/// Sums all entries and notes which dimensions have any data.
pub fn calc_stats(entries: &[Entry]) -> (EntryStats, With) {
    let mut total = EntryStats::default();
    for entry in entries {
        total.extend(&entry.stats);
    }
    let with = With {
        functions: total.current.functions.total != 0 || total.previous.functions.total != 0,
        branches: total.current.branches.total != 0 || total.previous.branches.total != 0,
    };
    (total, with)
}

const PERCENT_DIGITS: u8 = 2;

fn percent_hundredths(stats: &CoverageStats) -> i64 {
    let (whole, frac, _) = stats.percent(PERCENT_DIGITS);
    whole as i64 * 100 + frac as i64
}

fn percent_cell(marks: &Marks, current: &CoverageStats, previous: &CoverageStats) -> CellInfo {
    let (whole, frac, _) = current.percent(PERCENT_DIGITS);
    let diff = percent_hundredths(current) - percent_hundredths(previous);
    let change = if diff == 0 {
        String::new()
    } else {
        let sign = if diff < 0 { '-' } else { '+' };
        let diff = diff.abs();
        format!("{sign}{}.{:02}%", diff / 100, diff % 100)
    };
    CellInfo {
        value: format!("{whole}.{frac:02}%"),
        change,
        category: marks.rate(current),
        change_is_negative: diff < 0,
    }
}

fn counter_cell(current: u32, previous: u32) -> CellInfo {
    let diff = current as i64 - previous as i64;
    let change = if diff == 0 {
        String::new()
    } else {
        format!("{diff:+}")
    };
    CellInfo {
        value: current.to_string(),
        change,
        category: Rating::Passing,
        change_is_negative: diff < 0,
    }
}

fn missing(stats: &CoverageStats) -> u32 {
    stats.relevant.saturating_sub(stats.covered)
}

fn dimension_cells(
    marks: &Marks,
    cells: &mut Vec<CellInfo>,
    current: &CoverageStats,
    previous: &CoverageStats,
    with_total: bool,
) {
    cells.push(percent_cell(marks, current, previous));
    cells.push(counter_cell(current.relevant, previous.relevant));
    cells.push(counter_cell(missing(current), missing(previous)));
    if with_total {
        cells.push(counter_cell(current.total, previous.total));
    }
}

fn cells_for(marks: &Marks, stats: &EntryStats, with: With) -> Vec<CellInfo> {
    let mut cells = Vec::new();
    dimension_cells(
        marks,
        &mut cells,
        &stats.current.lines,
        &stats.previous.lines,
        true,
    );
    if with.functions {
        dimension_cells(
            marks,
            &mut cells,
            &stats.current.functions,
            &stats.previous.functions,
            false,
        );
    }
    if with.branches {
        dimension_cells(
            marks,
            &mut cells,
            &stats.current.branches,
            &stats.previous.branches,
            false,
        );
    }
    cells
}

/// Builds the rated table: columns for the populated dimensions, one row per
/// entry, and a footer row carrying the aggregated total.
pub fn project(
    marks: &Marks,
    entries: &[Entry],
    total: &EntryStats,
    with: With,
) -> ProjectedEntries {
    use ColData::*;
    use ColPriority::*;
    use ColTitle::*;

    let mut columns = vec![
        ColumnInfo {
            title: LinesCovered,
            priority: Key,
            data_type: Percentage,
        },
        ColumnInfo {
            title: LinesRelevant,
            priority: High,
            data_type: Counter,
        },
        ColumnInfo {
            title: LinesMissing,
            priority: High,
            data_type: Counter,
        },
        ColumnInfo {
            title: LinesTotal,
            priority: Supplemental,
            data_type: Counter,
        },
    ];
    if with.functions {
        columns.push(ColumnInfo {
            title: FunctionsCovered,
            priority: Supplemental,
            data_type: Percentage,
        });
        columns.push(ColumnInfo {
            title: FunctionsRelevant,
            priority: Supplemental,
            data_type: Counter,
        });
        columns.push(ColumnInfo {
            title: FunctionsMissing,
            priority: Supplemental,
            data_type: Counter,
        });
    }
    if with.branches {
        columns.push(ColumnInfo {
            title: BranchesCovered,
            priority: Supplemental,
            data_type: Percentage,
        });
        columns.push(ColumnInfo {
            title: BranchesRelevant,
            priority: Supplemental,
            data_type: Counter,
        });
        columns.push(ColumnInfo {
            title: BranchesMissing,
            priority: Supplemental,
            data_type: Counter,
        });
    }

    let rows = entries
        .iter()
        .map(|entry| RowInfo {
            entry_type: entry.entry_type,
            name: entry.name.clone(),
            data: cells_for(marks, &entry.stats, with),
        })
        .collect();

    ProjectedEntries {
        columns,
        rows,
        footer: cells_for(marks, total, with),
    }
}

/// The one-call form: filter, aggregate, rate.
pub fn project_report(
    filter: &ReportFilter,
    report: &[FileStats],
    marks: &Marks,
) -> ProjectedEntries {
    let entries = filter.project(report);
    let (total, with) = calc_stats(&entries);
    project(marks, &entries, &total, with)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn totals(total: u32, relevant: u32, covered: u32) -> CoverageTotals {
        CoverageTotals {
            lines: CoverageStats::new(total, relevant, covered),
            ..Default::default()
        }
    }

    fn file(name: &str, total: u32, relevant: u32, covered: u32) -> FileStats {
        FileStats {
            filename: name.to_string(),
            current: Some(FileCoverage {
                stats: totals(total, relevant, covered),
                contents: Oid::ZERO,
            }),
            ..Default::default()
        }
    }

    fn sample_report() -> Vec<FileStats> {
        vec![
            file("src/core/a.c", 10, 10, 9),
            file("src/core/b.c", 10, 10, 5),
            file("src/io/c.c", 20, 10, 10),
            file("README.md", 5, 0, 0),
        ]
    }

    #[test]
    fn test_prefixed_matching() {
        let prefixed = Prefixed::new("src", "/");
        assert!(prefixed.prefixes("src/a.c"));
        assert!(prefixed.prefixes("src"));
        assert!(!prefixed.prefixes("source/a.c"));
        assert_eq!(prefixed.apply_to("a.c"), "src/a.c");
        assert_eq!(prefixed.apply_to(""), "src");

        let trailing = Prefixed::new("src/", "/");
        assert_eq!(prefixed, trailing);

        let empty = Prefixed::new("", "/");
        assert!(empty.prefixes("anything"));
    }

    #[test]
    fn test_project_groups_by_next_segment() {
        let filter = ReportFilter::new(None, "", "");
        let entries = filter.project(&sample_report());

        // README.md (file), src (directory), sorted by expanded name
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::File);
        assert_eq!(entries[0].name.expanded, "README.md");
        assert_eq!(entries[1].entry_type, EntryType::Directory);
        assert_eq!(entries[1].name.expanded, "src");
        assert_eq!(entries[1].stats.current.lines, CoverageStats::new(40, 30, 24));
    }

    #[test]
    fn test_project_with_path_filter() {
        let filter = ReportFilter::new(None, "", "src");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.display, "core");
        assert_eq!(entries[0].name.expanded, "src/core");
        assert_eq!(entries[1].name.display, "io");

        let filter = ReportFilter::new(None, "", "src/core");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.entry_type == EntryType::File));
    }

    #[test]
    fn test_standalone_file() {
        let filter = ReportFilter::new(None, "", "src/io");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::StandaloneFile);
        assert_eq!(entries[0].name.expanded, "src/io/c.c");
    }

    #[test]
    fn test_project_with_module_filter() {
        let mods = crate::modules::Modules::from_config(
            &ConfigFile::from_text(
                "[module.sep]\nvalue = \"/\"\n[module \"app/core\"]\npath = \"src/core\"\n[module \"app/io\"]\npath = \"src/io\"\n",
            )
            .unwrap(),
        );

        // a non-leaf filter groups by the next module-name segment
        let filter = ReportFilter::new(Some(&mods), "app", "");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.entry_type == EntryType::Module));
        assert_eq!(entries[0].name.expanded, "app/core");
        assert_eq!(entries[0].stats.current.lines, CoverageStats::new(20, 20, 14));
        assert_eq!(entries[1].name.expanded, "app/io");

        // a leaf filter falls back to path grouping of that module's files
        let filter = ReportFilter::new(Some(&mods), "app/core", "");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Directory);
        assert_eq!(entries[0].name.expanded, "src");
        assert_eq!(entries[0].stats.current.lines, CoverageStats::new(20, 20, 14));

        // combining it with a path filter reaches the files
        let filter = ReportFilter::new(Some(&mods), "app/core", "src/core");
        let entries = filter.project(&sample_report());
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.entry_type == EntryType::File));

        // an unmatched module filter selects nothing
        let filter = ReportFilter::new(Some(&mods), "nope", "");
        assert!(filter.project(&sample_report()).is_empty());
    }

    #[test]
    fn test_footer_equals_row_sum() {
        let filter = ReportFilter::new(None, "", "");
        let entries = filter.project(&sample_report());
        let (total, with) = calc_stats(&entries);

        let mut summed = EntryStats::default();
        for entry in &entries {
            summed.extend(&entry.stats);
        }
        assert_eq!(total, summed);

        let table = project(&Marks::default(), &entries, &total, with);
        assert_eq!(table.rows.len(), entries.len());
        assert_eq!(table.footer.len(), table.columns.len());
        // lines relevant: 30, missing 6, total 45
        assert_eq!(table.footer[1].value, "30");
        assert_eq!(table.footer[2].value, "6");
        assert_eq!(table.footer[3].value, "45");
    }

    #[test]
    fn test_rated_cells() {
        let marks = Marks::default();
        let entries = vec![Entry {
            entry_type: EntryType::File,
            name: Label {
                display: "a.c".into(),
                expanded: "a.c".into(),
            },
            stats: EntryStats {
                current: totals(10, 10, 8),
                previous: totals(10, 10, 9),
            },
            previous_name: None,
            diff_kind: DiffKind::Modified,
        }];
        let (total, with) = calc_stats(&entries);
        let table = project(&marks, &entries, &total, with);

        let cell = &table.rows[0].data[0];
        assert_eq!(cell.value, "80.00%");
        assert_eq!(cell.change, "-10.00%");
        assert!(cell.change_is_negative);
        assert_eq!(cell.category, Rating::Incomplete);
    }

    #[test]
    fn test_optional_dimensions_add_columns() {
        let base = vec![Entry {
            entry_type: EntryType::File,
            name: Label::default(),
            stats: EntryStats {
                current: CoverageTotals {
                    lines: CoverageStats::new(10, 10, 10),
                    functions: CoverageStats::new(2, 2, 1),
                    branches: CoverageStats::default(),
                },
                previous: CoverageTotals::default(),
            },
            previous_name: None,
            diff_kind: DiffKind::Added,
        }];
        let (total, with) = calc_stats(&base);
        assert!(with.functions);
        assert!(!with.branches);

        let table = project(&Marks::default(), &base, &total, with);
        assert_eq!(table.columns.len(), 7);
        assert_eq!(table.rows[0].data.len(), 7);
    }
}
