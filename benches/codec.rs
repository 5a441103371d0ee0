use std::collections::BTreeMap;

use cov::{
    oid::Oid,
    report::{
        binary, CoverageStats, CoverageTotals, FileEntry, Files, LineCoverage, Object,
        ReportBuilder,
    },
    test_utils::scratch::ScratchRepo,
};

fn main() {
    divan::main();
}

fn sample_files(count: u32) -> Object {
    let entries = (0..count)
        .map(|index| {
            FileEntry::build()
                .path(&format!("src/module_{index:04}/lib.rs"))
                .line_stats(500, 400, 320)
                .contents(Oid::from_bytes([index as u8; 20]))
                .line_coverage(Oid::from_bytes([0xAA; 20]))
                .create()
        })
        .collect();
    Object::Files(Files::new(entries).unwrap())
}

fn sample_report() -> Object {
    Object::Report(
        ReportBuilder::new()
            .file_list(Oid::from_bytes([0x11; 20]))
            .commit(Oid::from_bytes([0x22; 20]), "main", 1_650_000_000)
            .author("Johnny Appleseed", "johnny@appleseed.com")
            .committer("Johnny Appleseed", "johnny@appleseed.com")
            .message("benchmark report")
            .added(1_660_000_000)
            .stats(CoverageTotals {
                lines: CoverageStats::new(100_000, 80_000, 64_000),
                ..Default::default()
            })
            .create(),
    )
}

#[divan::bench]
fn serialize_report(bencher: divan::Bencher) {
    let report = sample_report();
    bencher.bench(|| binary::serialize(&report).unwrap());
}

#[divan::bench(args = [64, 1024])]
fn round_trip_files(bencher: divan::Bencher, count: u32) {
    let files = sample_files(count);
    bencher.bench(|| {
        let bytes = binary::serialize(&files).unwrap();
        binary::deserialize(&bytes).unwrap()
    });
}

#[divan::bench]
fn line_coverage_rle(bencher: divan::Bencher) {
    let map: BTreeMap<u32, u32> = (0..10_000u32)
        .filter(|line| line % 3 != 0)
        .map(|line| (line + 1, line % 7))
        .collect();
    bencher.bench(|| {
        let coverage = LineCoverage::from_map(&map);
        coverage.to_map().unwrap()
    });
}

#[divan::bench]
fn store_write_lookup(bencher: divan::Bencher) {
    let scratch = ScratchRepo::new();
    let files = sample_files(128);
    bencher.bench(|| {
        let oid = scratch.repo().write(&files).unwrap();
        scratch.repo().lookup(oid).unwrap()
    });
}
