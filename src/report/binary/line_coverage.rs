//! Codec for `lnes` objects: a count followed by that many RLE words.

use super::{Reader, Writer};
use crate::{
    error::Result,
    report::models::{LineCov, LineCoverage},
};

pub(super) fn decode(body: &[u8]) -> Result<LineCoverage> {
    let mut reader = Reader::new(body);
    let count = reader.read_u32()?;
    let mut lines = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        lines.push(LineCov::from_word(reader.read_u32()?));
    }
    Ok(LineCoverage::new(lines))
}

pub(super) fn encode(coverage: &LineCoverage) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_u32(coverage.lines.len() as u32);
    for line in &coverage.lines {
        writer.write_u32(line.to_word());
    }
    writer.into_bytes()
}
