//! The binary object codec.
//!
//! Every object starts with a 64-bit header: a 32-bit magic tag and a 32-bit
//! version whose high 16 bits are the major version and low 16 bits the
//! minor. After the header comes a fixed per-kind record, then the string
//! table, then an optional entry array. Offsets and sizes inside records are
//! expressed in 32-bit words measured from the end of the header, so future
//! minors can grow the fixed record without breaking readers: readers locate
//! the string table and entry array from the recorded offsets, never from a
//! hardcoded position.
//!
//! Everything is little-endian.

pub mod strings;

mod build;
mod files;
mod function_coverage;
mod line_coverage;
mod report;

use crate::{
    error::{CovError, Result},
    oid::{Oid, OID_RAW_SIZE},
    report::Object,
};

pub const MAGIC_REPORT: u32 = u32::from_le_bytes(*b"rprt");
pub const MAGIC_BUILD: u32 = u32::from_le_bytes(*b"bld ");
pub const MAGIC_FILES: u32 = u32::from_le_bytes(*b"list");
pub const MAGIC_LINE_COVERAGE: u32 = u32::from_le_bytes(*b"lnes");
pub const MAGIC_FUNCTION_COVERAGE: u32 = u32::from_le_bytes(*b"fnct");

pub const VERSION_MAJOR_MASK: u32 = 0xFFFF_0000;
pub const VERSION_V1: u32 = 0x0001_0000;

const HEADER_SIZE: usize = 8;

/// Parses a serialised object, dispatching on the magic tag.
pub fn deserialize(buf: &[u8]) -> Result<Object> {
    if buf.len() < HEADER_SIZE {
        return Err(CovError::BadSyntax);
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());

    if version & VERSION_MAJOR_MASK != VERSION_V1 {
        return Err(CovError::UnsupportedVersion(version));
    }
    // a minor above ours may reference record fields we cannot locate
    if version & !VERSION_MAJOR_MASK != 0 {
        return Err(CovError::BadSyntax);
    }

    let body = &buf[HEADER_SIZE..];
    match magic {
        MAGIC_REPORT => Ok(Object::Report(report::decode(body)?)),
        MAGIC_BUILD => Ok(Object::Build(build::decode(body)?)),
        MAGIC_FILES => Ok(Object::Files(files::decode(body)?)),
        MAGIC_LINE_COVERAGE => Ok(Object::LineCoverage(line_coverage::decode(body)?)),
        MAGIC_FUNCTION_COVERAGE => Ok(Object::FunctionCoverage(function_coverage::decode(body)?)),
        unknown => Err(CovError::UnknownMagic(unknown)),
    }
}

/// Serialises an object into its canonical on-disk bytes (the bytes the
/// object's id is the SHA-1 of).
pub fn serialize(obj: &Object) -> Result<Vec<u8>> {
    let (magic, body) = match obj {
        Object::Report(value) => (MAGIC_REPORT, report::encode(value)?),
        Object::Build(value) => (MAGIC_BUILD, build::encode(value)?),
        Object::Files(value) => (MAGIC_FILES, files::encode(value)?),
        Object::LineCoverage(value) => (MAGIC_LINE_COVERAGE, line_coverage::encode(value)),
        Object::FunctionCoverage(value) => {
            (MAGIC_FUNCTION_COVERAGE, function_coverage::encode(value)?)
        }
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&VERSION_V1.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Sequential little-endian reader over an object body.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Timestamps are stored as two words, high half first.
    pub(crate) fn read_time(&mut self) -> Result<u64> {
        let hi = self.read_u32()? as u64;
        let lo = self.read_u32()? as u64;
        Ok((hi << 32) | lo)
    }

    pub(crate) fn read_oid(&mut self) -> Result<Oid> {
        let bytes = self.take(OID_RAW_SIZE)?;
        Ok(Oid::from_bytes(bytes.try_into().unwrap()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(CovError::BadSyntax);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

/// Bounds-checked slice of `words * 4` bytes starting `offset_words` words
/// into an object body.
pub(crate) fn word_slice(body: &[u8], offset_words: u32, words: u32) -> Result<&[u8]> {
    let start = (offset_words as usize)
        .checked_mul(4)
        .ok_or(CovError::BadSyntax)?;
    let len = (words as usize).checked_mul(4).ok_or(CovError::BadSyntax)?;
    let end = start.checked_add(len).ok_or(CovError::BadSyntax)?;
    if end > body.len() {
        return Err(CovError::BadSyntax);
    }
    Ok(&body[start..end])
}

/// Sequential little-endian writer for an object body.
#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Writer {
        Writer::default()
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn write_time(&mut self, value: u64) {
        self.write_u32((value >> 32) as u32);
        self.write_u32(value as u32);
    }

    pub(crate) fn write_oid(&mut self, oid: &Oid) {
        self.buf.extend_from_slice(oid.as_bytes());
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) fn read_stats(reader: &mut Reader) -> Result<crate::report::models::CoverageStats> {
    Ok(crate::report::models::CoverageStats {
        total: reader.read_u32()?,
        relevant: reader.read_u32()?,
        covered: reader.read_u32()?,
    })
}

pub(crate) fn read_totals(reader: &mut Reader) -> Result<crate::report::models::CoverageTotals> {
    Ok(crate::report::models::CoverageTotals {
        lines: read_stats(reader)?,
        functions: read_stats(reader)?,
        branches: read_stats(reader)?,
    })
}

pub(crate) fn write_stats(writer: &mut Writer, stats: &crate::report::models::CoverageStats) {
    writer.write_u32(stats.total);
    writer.write_u32(stats.relevant);
    writer.write_u32(stats.covered);
}

pub(crate) fn write_totals(writer: &mut Writer, totals: &crate::report::models::CoverageTotals) {
    write_stats(writer, &totals.lines);
    write_stats(writer, &totals.functions);
    write_stats(writer, &totals.branches);
}
