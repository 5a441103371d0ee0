//! Codec for `fnct` objects.

use super::{strings::StringTableBuilder, word_slice, Reader, Writer};
use crate::{
    error::{CovError, Result},
    report::models::{Function, FunctionCoverage},
};

const RECORD_WORDS: u32 = 5;
const ENTRY_WORDS: u32 = 7;

pub(super) fn decode(body: &[u8]) -> Result<FunctionCoverage> {
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

    let mut functions = Vec::with_capacity(entries_count.min(4096) as usize);
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
            let name_off = entry.read_u32()?;
            let demangled_off = entry.read_u32()?;
            functions.push(Function {
                name: table.at(name_off)?.to_string(),
                demangled_name: table.at(demangled_off)?.to_string(),
                count: entry.read_u32()?,
                start_line: entry.read_u32()?,
                start_col: entry.read_u32()?,
                end_line: entry.read_u32()?,
                end_col: entry.read_u32()?,
            });
        }
    }

    Ok(FunctionCoverage::new(functions))
}

pub(super) fn encode(coverage: &FunctionCoverage) -> Result<Vec<u8>> {
    let mut strings = StringTableBuilder::new();
    for function in &coverage.functions {
        strings.insert(&function.name);
        strings.insert(&function.demangled_name);
    }
    let table = strings.build();
    let table_words = (table.size() / 4) as u32;

    let mut writer = Writer::new();
    writer.write_u32(RECORD_WORDS);
    writer.write_u32(table_words);
    writer.write_u32(RECORD_WORDS + table_words);
    writer.write_u32(coverage.functions.len() as u32);
    writer.write_u32(ENTRY_WORDS);

    writer.write_bytes(table.as_bytes());

    for function in &coverage.functions {
        writer.write_u32(table.locate(&function.name)?);
        writer.write_u32(table.locate(&function.demangled_name)?);
        writer.write_u32(function.count);
        writer.write_u32(function.start_line);
        writer.write_u32(function.start_col);
        writer.write_u32(function.end_line);
        writer.write_u32(function.end_col);
    }

    Ok(writer.into_bytes())
}
