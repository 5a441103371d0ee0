//! Codec for `rprt` objects.

use super::{read_totals, strings::StringTableBuilder, word_slice, Reader, Writer};
use crate::{
    error::{CovError, Result},
    report::models::Report,
};

/// Fixed-record size in 32-bit words.
const RECORD_WORDS: u32 = 39;

/// Size of one build entry (an oid) in 32-bit words.
const BUILD_ENTRY_WORDS: u32 = 5;

pub(super) fn decode(body: &[u8]) -> Result<Report> {
    let mut reader = Reader::new(body);

    let parent = reader.read_oid()?;
    let file_list = reader.read_oid()?;
    let commit = reader.read_oid()?;
    let added = reader.read_time()?;
    let stats = read_totals(&mut reader)?;
    let commit_time = reader.read_time()?;

    let branch_off = reader.read_u32()?;
    let author_name_off = reader.read_u32()?;
    let author_email_off = reader.read_u32()?;
    let committer_name_off = reader.read_u32()?;
    let committer_email_off = reader.read_u32()?;
    let message_off = reader.read_u32()?;

    let strings_offset = reader.read_u32()?;
    let strings_size = reader.read_u32()?;
    let builds_offset = reader.read_u32()?;
    let builds_count = reader.read_u32()?;
    let builds_entry_size = reader.read_u32()?;

    if strings_offset < RECORD_WORDS {
        return Err(CovError::BadSyntax);
    }
    let table = super::strings::StringTable::from_block(
        word_slice(body, strings_offset, strings_size)?.to_vec(),
    );

    let mut builds = Vec::with_capacity(builds_count.min(1024) as usize);
    if builds_count > 0 {
        if builds_entry_size < BUILD_ENTRY_WORDS || builds_offset < RECORD_WORDS {
            return Err(CovError::BadSyntax);
        }
        let entries = word_slice(
            body,
            builds_offset,
            builds_count
                .checked_mul(builds_entry_size)
                .ok_or(CovError::BadSyntax)?,
        )?;
        for index in 0..builds_count as usize {
            let mut entry = Reader::new(&entries[index * builds_entry_size as usize * 4..]);
            builds.push(entry.read_oid()?);
        }
    }

    Ok(Report {
        parent,
        file_list,
        commit,
        added,
        stats,
        commit_time,
        branch: table.at(branch_off)?.to_string(),
        author_name: table.at(author_name_off)?.to_string(),
        author_email: table.at(author_email_off)?.to_string(),
        committer_name: table.at(committer_name_off)?.to_string(),
        committer_email: table.at(committer_email_off)?.to_string(),
        message: table.at(message_off)?.to_string(),
        builds,
    })
}

pub(super) fn encode(report: &Report) -> Result<Vec<u8>> {
    let mut strings = StringTableBuilder::new();
    strings
        .insert(&report.branch)
        .insert(&report.author_name)
        .insert(&report.author_email)
        .insert(&report.committer_name)
        .insert(&report.committer_email)
        .insert(&report.message);
    let table = strings.build();
    let table_words = (table.size() / 4) as u32;

    let mut writer = Writer::new();
    writer.write_oid(&report.parent);
    writer.write_oid(&report.file_list);
    writer.write_oid(&report.commit);
    writer.write_time(report.added);
    super::write_totals(&mut writer, &report.stats);
    writer.write_time(report.commit_time);

    writer.write_u32(table.locate(&report.branch)?);
    writer.write_u32(table.locate(&report.author_name)?);
    writer.write_u32(table.locate(&report.author_email)?);
    writer.write_u32(table.locate(&report.committer_name)?);
    writer.write_u32(table.locate(&report.committer_email)?);
    writer.write_u32(table.locate(&report.message)?);

    writer.write_u32(RECORD_WORDS);
    writer.write_u32(table_words);
    writer.write_u32(RECORD_WORDS + table_words);
    writer.write_u32(report.builds.len() as u32);
    writer.write_u32(BUILD_ENTRY_WORDS);

    writer.write_bytes(table.as_bytes());
    for build in &report.builds {
        writer.write_oid(build);
    }

    Ok(writer.into_bytes())
}
