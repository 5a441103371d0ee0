//! Codec for `bld ` objects.

use super::{read_totals, strings::StringTableBuilder, word_slice, Reader, Writer};
use crate::{
    error::{CovError, Result},
    report::models::Build,
};

const RECORD_WORDS: u32 = 19;

pub(super) fn decode(body: &[u8]) -> Result<Build> {
    let mut reader = Reader::new(body);

    let file_list = reader.read_oid()?;
    let added = reader.read_time()?;
    let stats = read_totals(&mut reader)?;
    let propset_off = reader.read_u32()?;
    let strings_offset = reader.read_u32()?;
    let strings_size = reader.read_u32()?;

    if strings_offset < RECORD_WORDS {
        return Err(CovError::BadSyntax);
    }
    let table = super::strings::StringTable::from_block(
        word_slice(body, strings_offset, strings_size)?.to_vec(),
    );

    Ok(Build {
        file_list,
        added,
        stats,
        propset: table.at(propset_off)?.to_string(),
    })
}

pub(super) fn encode(build: &Build) -> Result<Vec<u8>> {
    let mut strings = StringTableBuilder::new();
    strings.insert(&build.propset);
    let table = strings.build();

    let mut writer = Writer::new();
    writer.write_oid(&build.file_list);
    writer.write_time(build.added);
    super::write_totals(&mut writer, &build.stats);
    writer.write_u32(table.locate(&build.propset)?);
    writer.write_u32(RECORD_WORDS);
    writer.write_u32((table.size() / 4) as u32);
    writer.write_bytes(table.as_bytes());

    Ok(writer.into_bytes())
}
