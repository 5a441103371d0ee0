//! The revision parser: resolves expressions like `HEAD~3`, `main^`,
//! `<oid-prefix>` and ranges `A..B` against the combined object/reference
//! graph.
//!
//! The coverage DAG is linear in the first-parent sense, so `^n` with n > 1
//! resolves to nothing rather than being a syntax error, and `~N` simply
//! follows the parent-report chain.

use std::collections::HashSet;

use crate::{
    error::{CovError, Result},
    oid::Oid,
    report::Object,
    repository::Repository,
};

/// A parsed revision or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Revs {
    pub from: Oid,
    pub to: Oid,
    /// True when the input had no `..`; only `to` is meaningful then.
    pub single: bool,
}

impl Revs {
    /// Parses a revision or `A..B` range. An empty side of a range defaults
    /// to `HEAD`; `...` is not supported.
    pub fn parse(repo: &Repository, range: &str) -> Result<Revs> {
        let Some(pos) = range.find("..") else {
            return Ok(Revs {
                from: Oid::ZERO,
                to: Self::parse_single(repo, range)?,
                single: true,
            });
        };

        let from_rev = &range[..pos];
        let to_rev = &range[pos + 2..];

        if from_rev.is_empty() && to_rev.is_empty() {
            return Err(CovError::InvalidSpec("..".to_string()));
        }
        if to_rev.starts_with('.') {
            // ".." was part of "..." and symmetric difference is unsupported
            return Err(CovError::InvalidSpec(range.to_string()));
        }

        let head = if from_rev.is_empty() || to_rev.is_empty() {
            Some(Self::parse_single(repo, "HEAD")?)
        } else {
            None
        };

        let from = match head {
            Some(head) if from_rev.is_empty() => head,
            _ => Self::parse_single(repo, from_rev)?,
        };
        let to = match head {
            Some(head) if to_rev.is_empty() => head,
            _ => Self::parse_single(repo, to_rev)?,
        };

        let mut out = Revs {
            from,
            to,
            single: false,
        };
        out.locate_range(repo);
        Ok(out)
    }

    /// Parses a single revision into an oid.
    pub fn parse_single(repo: &Repository, rev: &str) -> Result<Oid> {
        let bytes = rev.as_bytes();
        let mut index = 0;
        while index < bytes.len() && bytes[index] != b'^' && bytes[index] != b'~' {
            index += 1;
        }
        let base = &rev[..index];

        let mut parent_count = 0usize;
        while index < bytes.len() {
            match bytes[index] {
                b'^' => {
                    index += 1;
                    let count = read_number(bytes, &mut index);
                    if count > 1 {
                        // anything past the first parent jumps outside the
                        // chain
                        return Err(CovError::NotFound);
                    }
                    parent_count += count;
                }
                b'~' => {
                    index += 1;
                    parent_count += read_number(bytes, &mut index);
                }
                other => {
                    return Err(CovError::InvalidSpec(format!(
                        "invalid pattern '{}'",
                        other as char
                    )));
                }
            }
        }

        let mut oid = resolve_base(repo, base)?;
        while parent_count > 0 {
            oid = next_parent(repo, oid).ok_or(CovError::NotFound)?;
            parent_count -= 1;
        }
        Ok(oid)
    }

    /*
        A                   K
         \                 /
          B       I       L
           \     /       /
            C   J       M
             \ /       /
              D       N
               \     /
                E   O
                 \ /
                  F
                  |
                  G
                  |
                  H

        locate_range(G..K) -> G..K
            K -> L -> M -> N -> O -> F -> G!
            G -> H -> zero
        locate_range(B..K) -> F..K
            K -> L -> M -> N -> O -> F!
            B -> C -> D -> E -> F
    */
    fn locate_range(&mut self, repo: &Repository) {
        if self.from.is_zero() || self.to.is_zero() {
            return;
        }

        let mut allowed: HashSet<Oid> = HashSet::new();
        let mut unallowed: HashSet<Oid> = HashSet::new();

        // `to` starts the accessible walk, `from` the inaccessible one
        let mut top = Some(self.to);
        let mut bottom = Some(self.from);

        while top.is_some() || bottom.is_some() {
            if let Some(current) = top {
                if unallowed.contains(&current) {
                    self.from = current;
                    return;
                }
                allowed.insert(current);
                top = next_parent(repo, current);
            }
            if let Some(current) = bottom {
                if allowed.contains(&current) {
                    self.from = current;
                    return;
                }
                unallowed.insert(current);
                bottom = next_parent(repo, current);
            }
        }

        // one side bottomed out, so everything reachable from `to` is in
        self.from = Oid::ZERO;
    }
}

/// Reads a run of digits at `*index`; no digits means 1.
fn read_number(bytes: &[u8], index: &mut usize) -> usize {
    let start = *index;
    let mut value = 0usize;
    while *index < bytes.len() && bytes[*index].is_ascii_digit() {
        value = value
            .saturating_mul(10)
            .saturating_add((bytes[*index] - b'0') as usize);
        *index += 1;
    }
    if *index == start {
        1
    } else {
        value
    }
}

/// The first-parent step, or `None` at the chain's root.
fn next_parent(repo: &Repository, oid: Oid) -> Option<Oid> {
    let report = repo.objects().lookup_report(oid).ok()?;
    if report.parent.is_zero() {
        None
    } else {
        Some(report.parent)
    }
}

/// Resolves a base: reference dwim first, then an object-id prefix naming a
/// stored report.
fn resolve_base(repo: &Repository, base: &str) -> Result<Oid> {
    match repo.refs().dwim(base) {
        Ok(reference) => {
            let peeled = repo.refs().peel(&reference)?;
            match peeled.direct_target() {
                Some(oid) if !oid.is_zero() => Ok(oid),
                _ => {
                    let head = repo.current_head()?;
                    if base == "HEAD" || Some(base) == head.branch.as_deref() {
                        Err(CovError::UnbornBranch)
                    } else {
                        Err(CovError::NotFound)
                    }
                }
            }
        }
        Err(CovError::NotFound) => {
            // the current branch exists in name only until its first report
            if let Ok(head) = repo.current_head() {
                if head.tip.is_none() && Some(base) == head.branch.as_deref() {
                    return Err(CovError::UnbornBranch);
                }
            }
            match repo.objects().lookup_prefix(base) {
                Ok((oid, Object::Report(_))) => Ok(oid),
                Ok(_) => Err(CovError::NotFound),
                Err(CovError::Ambiguous) => Err(CovError::Ambiguous),
                Err(_) => Err(CovError::NotFound),
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scratch::ScratchRepo;

    #[test]
    fn test_single_head_and_ancestry() {
        let scratch = ScratchRepo::new();
        let chain = scratch.commit_chain("main", 4); // A <- B <- C <- D

        let repo = scratch.repo();
        assert_eq!(Revs::parse_single(repo, "HEAD").unwrap(), chain[3]);
        assert_eq!(Revs::parse_single(repo, "HEAD~0").unwrap(), chain[3]);
        assert_eq!(
            Revs::parse_single(repo, "HEAD").unwrap(),
            Revs::parse_single(repo, "HEAD~0").unwrap()
        );
        assert_eq!(Revs::parse_single(repo, "HEAD~1").unwrap(), chain[2]);
        assert_eq!(Revs::parse_single(repo, "HEAD^").unwrap(), chain[2]);
        assert_eq!(Revs::parse_single(repo, "HEAD^^").unwrap(), chain[1]);
        assert_eq!(Revs::parse_single(repo, "HEAD~3").unwrap(), chain[0]);
        assert_eq!(Revs::parse_single(repo, "main~2").unwrap(), chain[1]);
        assert_eq!(Revs::parse_single(repo, "HEAD^0").unwrap(), chain[3]);
        assert!(matches!(
            Revs::parse_single(repo, "HEAD~4"),
            Err(CovError::NotFound)
        ));
        assert!(matches!(
            Revs::parse_single(repo, "HEAD^2"),
            Err(CovError::NotFound)
        ));
        assert!(matches!(
            Revs::parse_single(repo, "HEAD%"),
            Err(CovError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_single_by_prefix() {
        let scratch = ScratchRepo::new();
        let chain = scratch.commit_chain("main", 2);
        let repo = scratch.repo();

        let hex = chain[0].to_hex();
        assert_eq!(Revs::parse_single(repo, &hex[..10]).unwrap(), chain[0]);
        assert_eq!(Revs::parse_single(repo, &hex).unwrap(), chain[0]);
        assert!(matches!(
            Revs::parse_single(repo, "0123456789"),
            Err(CovError::NotFound)
        ));
    }

    #[test]
    fn test_unborn_head() {
        let scratch = ScratchRepo::new();
        let repo = scratch.repo();
        assert!(matches!(
            Revs::parse_single(repo, "HEAD"),
            Err(CovError::UnbornBranch)
        ));
        assert!(matches!(
            Revs::parse_single(repo, "main"),
            Err(CovError::UnbornBranch)
        ));
        assert!(matches!(
            Revs::parse_single(repo, "other"),
            Err(CovError::NotFound)
        ));
    }

    #[test]
    fn test_range_scenario() {
        let scratch = ScratchRepo::new();
        // A <- B <- C <- D on main, A <- E <- F on topic
        let main = scratch.commit_chain("main", 4);
        let topic = scratch.commit_chain_from("topic", main[0], 2);
        let repo = scratch.repo();

        let revs = Revs::parse(repo, "main..topic").unwrap();
        assert!(!revs.single);
        assert_eq!(revs.to, topic[1]);
        assert_eq!(revs.from, main[0]);

        assert_eq!(Revs::parse_single(repo, "topic~2").unwrap(), main[0]);
        assert!(matches!(
            Revs::parse_single(repo, "topic~3"),
            Err(CovError::NotFound)
        ));
    }

    #[test]
    fn test_range_head_defaults() {
        let scratch = ScratchRepo::new();
        let chain = scratch.commit_chain("main", 3);
        let repo = scratch.repo();

        let revs = Revs::parse(repo, "HEAD~2..").unwrap();
        assert_eq!(revs.to, chain[2]);
        assert_eq!(revs.from, chain[0]);

        let revs = Revs::parse(repo, &format!("..{}", chain[1].to_hex())).unwrap();
        assert_eq!(revs.to, chain[1]);

        assert!(matches!(
            Revs::parse(repo, ".."),
            Err(CovError::InvalidSpec(_))
        ));
        assert!(matches!(
            Revs::parse(repo, "main...topic"),
            Err(CovError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_range_disjoint_histories() {
        let scratch = ScratchRepo::new();
        let main = scratch.commit_chain("main", 2);
        let other = scratch.commit_chain_from("other", Oid::ZERO, 2);
        let repo = scratch.repo();

        // no common ancestor: everything reachable from `to` is included
        let revs = Revs::parse(repo, "main..other").unwrap();
        assert_eq!(revs.to, other[1]);
        assert!(revs.from.is_zero());
        let _ = main;
    }
}
