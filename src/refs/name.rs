//! Reference-name validation.
//!
//! The rules mirror the source-control collaborator's: names are
//! slash-separated components, and a name that fails here is never written to
//! disk or resolved through dwim.

/// Checks one slash-separated component.
fn is_valid_component(component: &str) -> bool {
    if component.is_empty()
        || component == "@"
        || component.starts_with('-')
        || component.starts_with('.')
        || component.ends_with('.')
        || component.ends_with(".lock")
        || component.contains("..")
        || component.contains("@{")
    {
        return false;
    }
    component.bytes().all(|b| {
        !b.is_ascii_control()
            && b != 0x7F
            && !matches!(b, b' ' | b'~' | b'^' | b':' | b'?' | b'*' | b'[' | b'\\')
    })
}

/// Checks a branch or tag shorthand (which may itself contain slashes, e.g.
/// `feature/login`).
pub fn is_valid_shorthand(shorthand: &str) -> bool {
    !shorthand.is_empty() && shorthand.split('/').all(is_valid_component)
}

/// Checks a full reference name: `HEAD`, or `refs/<category>/<shorthand>`.
pub fn is_valid_name(name: &str) -> bool {
    if name == "HEAD" {
        return true;
    }
    let Some(rest) = name.strip_prefix("refs/") else {
        return false;
    };
    is_valid_shorthand(rest) && rest.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_names() {
        assert!(is_valid_name("HEAD"));
        assert!(is_valid_name("refs/heads/main"));
        assert!(is_valid_name("refs/heads/feature/login"));
        assert!(is_valid_name("refs/tags/v1.2.3"));
        assert!(is_valid_shorthand("main"));
        assert!(is_valid_shorthand("feature/login"));
    }

    #[test]
    fn test_rejects_forbidden_patterns() {
        for name in [
            "",
            "-main",
            "main..next",
            "main.lock",
            "mai:n",
            "ma?in",
            "ma*in",
            "ma[in",
            "ma\\in",
            "ma in",
            "main@{1}",
            "@",
            ".hidden",
            "trailing.",
            "a//b",
            "/lead",
            "trail/",
            "ma~in",
            "ma^in",
        ] {
            assert!(!is_valid_shorthand(name), "{name:?} should be invalid");
        }
        assert!(!is_valid_name("refs/heads"));
        assert!(!is_valid_name("refs/heads/"));
        assert!(!is_valid_name("heads/main"));
        assert!(!is_valid_name("refs/heads/ma\x07in"));
    }
}
