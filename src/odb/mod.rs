//! The loose object store.
//!
//! Objects live at `objects/<xx>/<38 hex>` under the repository directory,
//! zlib-compressed; the name is the SHA-1 of the serialised bytes before
//! compression. Writes go through a deflate+SHA-1 temp stream and an atomic
//! rename, so writing an object that already exists is idempotent and two
//! concurrent writers of the same content cannot corrupt each other.

pub mod zstream;

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use crate::{
    error::{CovError, Result},
    oid::{Oid, OID_HEX_SIZE},
    report::{binary, Build, Files, FunctionCoverage, LineCoverage, Object, Report},
};

/// The shortest oid prefix a lookup will resolve.
pub const MIN_PREFIX_LEN: usize = 4;

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// `root` is the repository's `objects/` directory. Nothing is created
    /// until the first write.
    pub fn new(root: PathBuf) -> ObjectStore {
        ObjectStore { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Serialises and stores an object, returning its content id.
    pub fn write(&self, obj: &Object) -> Result<Oid> {
        let bytes = binary::serialize(obj)?;

        let mut writer = zstream::DeflateWriter::new(&self.root)?;
        if let Err(err) = writer.write_all(&bytes) {
            writer.rollback();
            return Err(err.into());
        }
        let (oid, tmp_path) = writer.finish()?;

        let path = self.root.join(oid.path_name());
        if let Some(bucket) = path.parent() {
            fs::create_dir_all(bucket)?;
        }
        fs::rename(tmp_path, path)?;
        Ok(oid)
    }

    /// Loads and parses the object named by `oid`.
    pub fn lookup(&self, oid: Oid) -> Result<Object> {
        if oid.is_zero() {
            return Err(CovError::NotFound);
        }
        let compressed = match fs::read(self.root.join(oid.path_name())) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CovError::NotFound)
            }
            Err(err) => return Err(err.into()),
        };
        binary::deserialize(&zstream::inflate(&compressed)?)
    }

    pub fn contains(&self, oid: Oid) -> bool {
        !oid.is_zero() && self.root.join(oid.path_name()).exists()
    }

    /// Resolves a hex prefix to the id of the single stored object starting
    /// with it. Fewer than four characters (or non-hex input) is `NotFound`;
    /// more than one match is `Ambiguous`.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<Oid> {
        if prefix.len() < MIN_PREFIX_LEN
            || prefix.len() > OID_HEX_SIZE
            || !prefix.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(CovError::NotFound);
        }
        let prefix = prefix.to_ascii_lowercase();
        if prefix.len() == OID_HEX_SIZE {
            let oid = Oid::from_hex(&prefix)?;
            return if self.contains(oid) {
                Ok(oid)
            } else {
                Err(CovError::NotFound)
            };
        }

        let (bucket, rest) = prefix.split_at(2);
        let entries = match fs::read_dir(self.root.join(bucket)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CovError::NotFound)
            }
            Err(err) => return Err(err.into()),
        };

        let mut found = None;
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() != OID_HEX_SIZE - 2 || !name.starts_with(rest) {
                continue;
            }
            let Ok(oid) = Oid::from_hex(&format!("{bucket}{name}")) else {
                continue;
            };
            if found.replace(oid).is_some() {
                return Err(CovError::Ambiguous);
            }
        }
        found.ok_or(CovError::NotFound)
    }

    /// Prefix lookup: resolve, load, parse.
    pub fn lookup_prefix(&self, prefix: &str) -> Result<(Oid, Object)> {
        let oid = self.resolve_prefix(prefix)?;
        Ok((oid, self.lookup(oid)?))
    }

    pub fn lookup_report(&self, oid: Oid) -> Result<Report> {
        self.lookup(oid)?.into_report()
    }

    pub fn lookup_build(&self, oid: Oid) -> Result<Build> {
        self.lookup(oid)?.into_build()
    }

    pub fn lookup_files(&self, oid: Oid) -> Result<Files> {
        self.lookup(oid)?.into_files()
    }

    pub fn lookup_line_coverage(&self, oid: Oid) -> Result<LineCoverage> {
        self.lookup(oid)?.into_line_coverage()
    }

    pub fn lookup_function_coverage(&self, oid: Oid) -> Result<FunctionCoverage> {
        self.lookup(oid)?.into_function_coverage()
    }
}

#[cfg(test)]
mod tests {
    use sha1::{Digest, Sha1};
    use tempfile::TempDir;

    use super::*;
    use crate::report::models::{LineCov, LineCoverage};

    struct Ctx {
        temp_dir: TempDir,
    }

    fn setup() -> Ctx {
        Ctx {
            temp_dir: TempDir::new().ok().unwrap(),
        }
    }

    fn store(ctx: &Ctx) -> ObjectStore {
        ObjectStore::new(ctx.temp_dir.path().join("objects"))
    }

    fn sample_coverage(seed: u32) -> Object {
        Object::LineCoverage(LineCoverage::new(vec![
            LineCov::hits(seed),
            LineCov::skip(2),
            LineCov::hits(0),
        ]))
    }

    #[test]
    fn test_write_then_lookup() {
        let ctx = setup();
        let store = store(&ctx);

        let obj = sample_coverage(3);
        let oid = store.write(&obj).unwrap();
        assert!(store.contains(oid));
        assert_eq!(store.lookup(oid).unwrap(), obj);

        // the id is the SHA-1 of the serialised bytes before compression
        let mut hasher = Sha1::new();
        hasher.update(binary::serialize(&obj).unwrap());
        assert_eq!(oid.as_bytes()[..], hasher.finalize()[..]);
    }

    #[test]
    fn test_write_is_idempotent() {
        let ctx = setup();
        let store = store(&ctx);

        let obj = sample_coverage(3);
        let first = store.write(&obj).unwrap();
        let second = store.write(&obj).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.lookup(first).unwrap(), obj);

        // exactly one file in the bucket
        let bucket = store.root().join(&first.to_hex()[..2]);
        assert_eq!(fs::read_dir(bucket).unwrap().count(), 1);
    }

    #[test]
    fn test_lookup_missing_and_zero() {
        let ctx = setup();
        let store = store(&ctx);
        assert!(matches!(store.lookup(Oid::ZERO), Err(CovError::NotFound)));
        let oid = Oid::from_hex("abcdef0123456789abcdef0123456789abcdef01").unwrap();
        assert!(matches!(store.lookup(oid), Err(CovError::NotFound)));
    }

    #[test]
    fn test_typed_lookup_mismatch() {
        let ctx = setup();
        let store = store(&ctx);
        let oid = store.write(&sample_coverage(1)).unwrap();
        assert!(matches!(
            store.lookup_report(oid),
            Err(CovError::WrongObjectType)
        ));
        assert!(store.lookup_line_coverage(oid).is_ok());
    }

    #[test]
    fn test_prefix_lookup() {
        let ctx = setup();
        let store = store(&ctx);
        let obj = sample_coverage(7);
        let oid = store.write(&obj).unwrap();
        let hex = oid.to_hex();

        for len in [4, 7, 17, 40] {
            let (found, parsed) = store.lookup_prefix(&hex[..len]).unwrap();
            assert_eq!(found, oid, "prefix length {len}");
            assert_eq!(parsed, obj);
        }

        assert!(matches!(
            store.resolve_prefix(&hex[..3]),
            Err(CovError::NotFound)
        ));
        assert!(matches!(
            store.resolve_prefix("not-hex!"),
            Err(CovError::NotFound)
        ));
    }

    #[test]
    fn test_prefix_lookup_ambiguous() {
        let ctx = setup();
        let store = store(&ctx);

        // two objects sharing a bucket and a long prefix
        let bucket = store.root().join("de");
        fs::create_dir_all(&bucket).unwrap();
        let payload = {
            use std::io::Write as _;
            let mut enc =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(&binary::serialize(&sample_coverage(1)).unwrap())
                .unwrap();
            enc.finish().unwrap()
        };
        let zeros = "0".repeat(31);
        fs::write(bucket.join(format!("adbeef{zeros}a")), &payload).unwrap();
        fs::write(bucket.join(format!("adbeef{zeros}b")), &payload).unwrap();

        assert!(matches!(
            store.resolve_prefix("deadbeef"),
            Err(CovError::Ambiguous)
        ));
        assert!(store
            .resolve_prefix(&format!("deadbeef{zeros}a"))
            .is_ok());
        assert!(matches!(
            store.resolve_prefix(&format!("deadbeef{zeros}c")),
            Err(CovError::NotFound)
        ));
    }
}
