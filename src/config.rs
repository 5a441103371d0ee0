//! The restricted-INI config file model.
//!
//! Both the repository `config` file and `.covmodule` overlays use the same
//! grammar:
//!
//! ```notrust
//! file    := (line eol)* line?
//! line    := header | value | comment
//! header  := "[" IDENT ("." IDENT)* ("\"" TEXT "\"")? "]" comment?
//! value   := IDENT SP? "=" SP? token* comment?
//! comment := (";" | "#") rest-of-line
//! ```
//!
//! Entries are addressed by dotted keys: the header path (components
//! lowercased, quoted subsection verbatim) joined with the value name, so
//! `[module "core"] path = x` and `[module.core] path = x` both yield the
//! entry `module.core.path`. Multi-valued keys keep their order of
//! appearance.
//!
//! Writers never rewrite the file in place: [`ConfigFile::save`] writes a
//! `.lock` sibling and renames it over the config on commit.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use winnow::{
    combinator::{alt, delimited, opt, preceded, repeat},
    token::{none_of, one_of, take_while},
    PResult, Parser,
};

use crate::error::{CovError, Result};

#[derive(Debug, Clone, PartialEq)]
enum LineKind {
    Section {
        // dotted header components, lowercased
        components: Vec<String>,
        // quoted subsection, verbatim
        subsection: Option<String>,
    },
    Value {
        key: String,
        value: String,
    },
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    raw: String,
    kind: LineKind,
}

/* Grammar helpers. */

fn sp(buf: &mut &str) -> PResult<()> {
    take_while(0.., [' ', '\t']).void().parse_next(buf)
}

/// `IDENT ("." IDENT)*` as the original grammar reads it: a single run of
/// alphanumerics, dashes and dots starting with an alphanumeric.
fn header_ident(buf: &mut &str) -> PResult<String> {
    (
        one_of(|c: char| c.is_ascii_alphanumeric()),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '-' || c == '.'
        }),
    )
        .recognize()
        .map(str::to_string)
        .parse_next(buf)
}

fn ident(buf: &mut &str) -> PResult<String> {
    (
        one_of(|c: char| c.is_ascii_alphanumeric()),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '-'),
    )
        .recognize()
        .map(str::to_string)
        .parse_next(buf)
}

/// One possibly-escaped character inside a quoted string.
fn quoted_char(buf: &mut &str) -> PResult<char> {
    alt((
        preceded(
            '\\',
            alt((
                'n'.value('\n'),
                't'.value('\t'),
                '"'.value('"'),
                '\\'.value('\\'),
            )),
        ),
        none_of(['"', '\n', '\r']),
    ))
    .parse_next(buf)
}

fn quoted_string(buf: &mut &str) -> PResult<String> {
    delimited(
        '"',
        repeat(0.., quoted_char).fold(String::new, |mut acc, c| {
            acc.push(c);
            acc
        }),
        '"',
    )
    .parse_next(buf)
}

fn bare_token(buf: &mut &str) -> PResult<String> {
    take_while(1.., |c: char| {
        !matches!(c, ' ' | '\t' | '\r' | '\n' | '"' | ';' | '#')
    })
    .map(str::to_string)
    .parse_next(buf)
}

/// One value token with a flag for whether blanks preceded it.
fn value_token(buf: &mut &str) -> PResult<(bool, String)> {
    (
        take_while(0.., [' ', '\t']).map(|s: &str| !s.is_empty()),
        alt((quoted_string, bare_token)),
    )
        .parse_next(buf)
}

/// Token sequence joined into the entry value: adjacent tokens concatenate,
/// blank-separated tokens contribute a single space.
fn value_text(buf: &mut &str) -> PResult<String> {
    repeat(0.., value_token)
        .fold(String::new, |mut acc, (spaced, token)| {
            if !acc.is_empty() && spaced {
                acc.push(' ');
            }
            acc.push_str(&token);
            acc
        })
        .parse_next(buf)
}

/// Trailing blanks and an optional `;`/`#` comment.
fn trailing_comment(buf: &mut &str) -> PResult<()> {
    (
        sp,
        opt((one_of([';', '#']), take_while(0.., |c: char| c != '\n'))),
    )
        .void()
        .parse_next(buf)
}

fn header_line(buf: &mut &str) -> PResult<LineKind> {
    delimited(
        (sp, '[', sp),
        (header_ident, opt(preceded(sp, quoted_string))),
        (sp, ']', trailing_comment),
    )
    .map(|(path, subsection)| LineKind::Section {
        components: path.split('.').map(str::to_lowercase).collect(),
        subsection,
    })
    .parse_next(buf)
}

fn value_line(buf: &mut &str) -> PResult<LineKind> {
    (
        delimited(sp, ident, (sp, '=', sp)),
        value_text,
        trailing_comment,
    )
        .map(|(key, value, ())| LineKind::Value {
            key: key.to_lowercase(),
            value,
        })
        .parse_next(buf)
}

fn comment_line(buf: &mut &str) -> PResult<LineKind> {
    trailing_comment.value(LineKind::Blank).parse_next(buf)
}

fn parse_line(raw: &str) -> Result<LineKind> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    alt((header_line, value_line, comment_line))
        .parse(raw)
        .map_err(|_| CovError::BadSyntax)
}

/* The file model. */

/// The dotted section path of a header line: components joined, subsection
/// appended verbatim.
fn section_path(components: &[String], subsection: &Option<String>) -> String {
    let mut path = components.join(".");
    if let Some(subsection) = subsection {
        path.push('.');
        path.push_str(subsection);
    }
    path
}

/// Splits a dotted entry key into `(section path, value name)`. The section
/// is everything up to the last dot.
fn split_key(key: &str) -> Result<(String, String)> {
    let (section, name) = key
        .rsplit_once('.')
        .ok_or_else(|| CovError::InvalidSpec(key.to_string()))?;
    if section.is_empty() || name.is_empty() {
        return Err(CovError::InvalidSpec(key.to_string()));
    }
    Ok((section.to_string(), name.to_lowercase()))
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn render_value(key: &str, value: &str) -> Line {
    Line {
        raw: format!("\t{key} = {}", escape_value(value)),
        kind: LineKind::Value {
            key: key.to_string(),
            value: value.to_string(),
        },
    }
}

fn render_section(section: &str) -> Line {
    // two-component paths render in the quoted-subsection form the way the
    // source-control collaborator writes them
    let kind = match section.split_once('.') {
        Some((first, rest)) => LineKind::Section {
            components: vec![first.to_lowercase()],
            subsection: Some(rest.to_string()),
        },
        None => LineKind::Section {
            components: vec![section.to_lowercase()],
            subsection: None,
        },
    };
    let raw = match &kind {
        LineKind::Section {
            components,
            subsection: Some(subsection),
        } => format!("[{} {}]", components.join("."), escape_value(subsection)),
        LineKind::Section { components, .. } => format!("[{}]", components.join(".")),
        LineKind::Value { .. } | LineKind::Blank => unreachable!(),
    };
    Line { raw, kind }
}

/// An in-memory image of one config file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigFile {
    path: Option<PathBuf>,
    lines: Vec<Line>,
}

impl ConfigFile {
    /// Opens a config file; a missing file is an empty image that will be
    /// created on save.
    pub fn open(path: &Path) -> Result<ConfigFile> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let mut cfg = ConfigFile::from_text(&text)?;
        cfg.path = Some(path.to_path_buf());
        Ok(cfg)
    }

    /// Parses config text that does not live on disk (e.g. a blob from the
    /// source-control collaborator).
    pub fn from_text(text: &str) -> Result<ConfigFile> {
        let mut lines = Vec::new();
        for raw in text.lines() {
            lines.push(Line {
                raw: raw.to_string(),
                kind: parse_line(raw)?,
            });
        }
        Ok(ConfigFile { path: None, lines })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.raw);
            out.push('\n');
        }
        out
    }

    /// All entries as `(dotted key, value)` in order of appearance.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut section = String::new();
        for line in &self.lines {
            match &line.kind {
                LineKind::Section {
                    components,
                    subsection,
                } => section = section_path(components, subsection),
                LineKind::Value { key, value } if !section.is_empty() => {
                    out.push((format!("{section}.{key}"), value.clone()));
                }
                LineKind::Value { .. } | LineKind::Blank => {}
            }
        }
        out
    }

    /// The last value recorded for `key`, if any.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries()
            .into_iter()
            .rev()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
    }

    /// Every value recorded for `key`, in order.
    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
            .collect()
    }

    fn section_span(&self, section: &str) -> Option<(usize, usize)> {
        let mut start = None;
        let mut current = String::new();
        for (index, line) in self.lines.iter().enumerate() {
            match &line.kind {
                LineKind::Section {
                    components,
                    subsection,
                } => {
                    if start.is_some() {
                        return Some((start.unwrap(), index));
                    }
                    current = section_path(components, subsection);
                    if current == section {
                        start = Some(index);
                    }
                }
                _ => {}
            }
        }
        start.map(|s| (s, self.lines.len()))
    }

    /// Sets `key` to a single value, replacing the last existing occurrence
    /// or appending to (possibly creating) its section.
    pub fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, name) = split_key(key)?;

        if let Some((start, end)) = self.section_span(&section) {
            let mut last = None;
            for index in start + 1..end {
                if matches!(&self.lines[index].kind, LineKind::Value { key: k, .. } if *k == name) {
                    last = Some(index);
                }
            }
            match last {
                Some(index) => self.lines[index] = render_value(&name, value),
                None => self.lines.insert(end, render_value(&name, value)),
            }
        } else {
            self.lines.push(render_section(&section));
            self.lines.push(render_value(&name, value));
        }
        Ok(())
    }

    /// Appends one more value for a multi-valued key.
    pub fn add_multivar(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, name) = split_key(key)?;
        match self.section_span(&section) {
            Some((_, end)) => self.lines.insert(end, render_value(&name, value)),
            None => {
                self.lines.push(render_section(&section));
                self.lines.push(render_value(&name, value));
            }
        }
        Ok(())
    }

    /// Removes every entry whose dotted key satisfies `predicate`.
    pub fn delete_matching(&mut self, predicate: impl Fn(&str) -> bool) {
        let mut section = String::new();
        let mut keep = Vec::with_capacity(self.lines.len());
        for line in self.lines.drain(..) {
            let remove = match &line.kind {
                LineKind::Section {
                    components,
                    subsection,
                } => {
                    section = section_path(components, subsection);
                    false
                }
                LineKind::Value { key, .. } if !section.is_empty() => {
                    predicate(&format!("{section}.{key}"))
                }
                LineKind::Value { .. } | LineKind::Blank => false,
            };
            if !remove {
                keep.push(line);
            }
        }
        self.lines = keep;
    }

    pub fn delete_all(&mut self, key: &str) {
        self.delete_matching(|entry_key| entry_key == key);
    }

    /// Drops comments, blank lines and sections whose body ended up with no
    /// values.
    pub fn cleanup(&mut self) {
        let mut out: Vec<Line> = Vec::with_capacity(self.lines.len());
        let mut pending_section: Option<Line> = None;
        for line in self.lines.drain(..) {
            match &line.kind {
                LineKind::Section { .. } => pending_section = Some(line),
                LineKind::Value { .. } => {
                    if let Some(section) = pending_section.take() {
                        out.push(section);
                    }
                    out.push(line);
                }
                LineKind::Blank => {}
            }
        }
        self.lines = out;
    }

    /// Writes the image back atomically: the content goes to a `.lock`
    /// sibling which is renamed over the config on success.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| CovError::InvalidSpec("config has no backing file".to_string()))?;
        let lock = ConfigLock::acquire(path)?;
        lock.commit(self.render().as_bytes())
    }
}

/// The `.lock` sibling that serialises config writers.
struct ConfigLock {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ConfigLock {
    fn acquire(path: &Path) -> Result<ConfigLock> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));
        // create_new doubles as the lock: a second writer errors out
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)?;
        Ok(ConfigLock {
            path: path.to_path_buf(),
            lock_path,
        })
    }

    fn commit(self, content: &[u8]) -> Result<()> {
        fs::write(&self.lock_path, content)?;
        fs::rename(&self.lock_path, &self.path)?;
        Ok(())
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
