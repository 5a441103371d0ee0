//! Codec for `list` objects.

use super::{read_totals, strings::StringTableBuilder, word_slice, Reader, Writer};
use crate::{
    error::{CovError, Result},
    report::models::{FileEntry, Files},
};

const RECORD_WORDS: u32 = 5;
const ENTRY_WORDS: u32 = 31;

const FLAG_IS_DIRTY: u32 = 1 << 0;
const FLAG_IS_MODIFIED: u32 = 1 << 1;

pub(super) fn decode(body: &[u8]) -> Result<Files> {
    let mut reader = Reader::new(body);

    let strings_offset = reader.read_u32()?;
    let strings_size = reader.read_u32()?;
    let entries_offset = reader.read_u32()?;
    let entries_count = reader.read_u32()?;
    let entry_size = reader.read_u32()?;

    if strings_offset < RECORD_WORDS {
        return Err(CovError::BadSyntax);
    }
    let table = super::strings::StringTable::from_block(
        word_slice(body, strings_offset, strings_size)?.to_vec(),
    );

    let mut entries = Vec::with_capacity(entries_count.min(4096) as usize);
    if entries_count > 0 {
        if entry_size < ENTRY_WORDS || entries_offset < RECORD_WORDS {
            return Err(CovError::BadSyntax);
        }
        let block = word_slice(
            body,
            entries_offset,
            entries_count
                .checked_mul(entry_size)
                .ok_or(CovError::BadSyntax)?,
        )?;
        for index in 0..entries_count as usize {
            let mut entry = Reader::new(&block[index * entry_size as usize * 4..]);
            let flags = entry.read_u32()?;
            let path_off = entry.read_u32()?;
            let stats = read_totals(&mut entry)?;
            let contents = entry.read_oid()?;
            let line_coverage = entry.read_oid()?;
            let function_coverage = entry.read_oid()?;
            let branch_coverage = entry.read_oid()?;

            entries.push(FileEntry {
                path: table.at(path_off)?.to_string(),
                is_dirty: flags & FLAG_IS_DIRTY != 0,
                is_modified: flags & FLAG_IS_MODIFIED != 0,
                stats,
                contents,
                line_coverage,
                function_coverage,
                branch_coverage,
            });
        }
    }

    // entries are ordered by path with no duplicates
    for pair in entries.windows(2) {
        if pair[0].path >= pair[1].path {
            return Err(CovError::BadSyntax);
        }
    }

    Ok(Files::from_ordered(entries))
}

pub(super) fn encode(files: &Files) -> Result<Vec<u8>> {
    let mut strings = StringTableBuilder::new();
    for entry in files.entries() {
        strings.insert(&entry.path);
    }
    let table = strings.build();
    let table_words = (table.size() / 4) as u32;

    let mut writer = Writer::new();
    writer.write_u32(RECORD_WORDS);
    writer.write_u32(table_words);
    writer.write_u32(RECORD_WORDS + table_words);
    writer.write_u32(files.entries().len() as u32);
    writer.write_u32(ENTRY_WORDS);

    writer.write_bytes(table.as_bytes());

    for entry in files.entries() {
        let mut flags = 0;
        if entry.is_dirty {
            flags |= FLAG_IS_DIRTY;
        }
        if entry.is_modified {
            flags |= FLAG_IS_MODIFIED;
        }
        writer.write_u32(flags);
        writer.write_u32(table.locate(&entry.path)?);
        super::write_totals(&mut writer, &entry.stats);
        writer.write_oid(&entry.contents);
        writer.write_oid(&entry.line_coverage);
        writer.write_oid(&entry.function_coverage);
        writer.write_oid(&entry.branch_coverage);
    }

    Ok(writer.into_bytes())
}
