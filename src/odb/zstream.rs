//! zlib plumbing and safe temp-file writes.
//!
//! Writers never touch their final path directly: bytes go to a randomly
//! named sibling temp file which is renamed into place on commit, so readers
//! observe either the old content or the new, never a torn write.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha1::{Digest, Sha1};

use crate::{
    error::{CovError, Result},
    oid::Oid,
};

/// Inflates a whole zlib stream into memory. Corrupt input is `BadSyntax`.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut output)
        .map_err(|_| CovError::BadSyntax)?;
    Ok(output)
}

/// A random 6-10 character alphanumeric suffix, so concurrent writers in the
/// same directory do not collide.
fn random_suffix() -> String {
    let mut rng = thread_rng();
    let length = rng.gen_range(6..=10);
    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn create_temp(dir: &Path, prefix: &str, postfix: &str) -> Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    loop {
        let path = dir.join(format!("{prefix}{}{postfix}", random_suffix()));
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Writes to `<stem>_tmp<suffix><ext>` next to the target and renames over it
/// on [`SafeFile::commit`].
pub struct SafeFile {
    target: PathBuf,
    tmp_path: PathBuf,
    // Some until commit/rollback; the handle is closed before the rename
    file: Option<File>,
}

impl SafeFile {
    pub fn create(target: &Path) -> Result<SafeFile> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let stem = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let ext = target
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{s}"))
            .unwrap_or_default();
        let (file, tmp_path) = create_temp(dir, &format!("{stem}_tmp"), &ext)?;
        Ok(SafeFile {
            target: target.to_path_buf(),
            tmp_path,
            file: Some(file),
        })
    }

    pub fn commit(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        fs::rename(&self.tmp_path, &self.target)?;
        Ok(())
    }

    pub fn rollback(mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.tmp_path);
    }
}

impl Write for SafeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Deflates raw bytes into a temp file while teeing them through SHA-1.
///
/// [`DeflateWriter::finish`] yields the id of the raw bytes and the temp path
/// holding the compressed stream, ready to be renamed to its
/// content-addressed home.
pub struct DeflateWriter {
    hasher: Sha1,
    encoder: ZlibEncoder<File>,
    tmp_path: PathBuf,
}

impl DeflateWriter {
    pub fn new(dir: &Path) -> Result<DeflateWriter> {
        let (file, tmp_path) = create_temp(dir, "object", "")?;
        Ok(DeflateWriter {
            hasher: Sha1::new(),
            encoder: ZlibEncoder::new(file, Compression::fast()),
            tmp_path,
        })
    }

    pub fn finish(self) -> Result<(Oid, PathBuf)> {
        let mut file = self.encoder.finish()?;
        file.flush()?;
        drop(file);
        let digest = self.hasher.finalize();
        Ok((Oid::from_bytes(digest.into()), self.tmp_path))
    }

    pub fn rollback(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.encoder);
        let _ = fs::remove_file(tmp_path);
    }
}

impl Write for DeflateWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write_all(buf)?;
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}
