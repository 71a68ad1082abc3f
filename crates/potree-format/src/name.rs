//! Node naming and hierarchy paths.
//!
//! Nodes are named by their path from the root: the root is `"r"` and each
//! descent appends the child's octant digit (`0`-`7`), so `"r40"` is child 0
//! of child 4 of the root. On disk, nodes are grouped into directories of
//! `hierarchy_step_size` levels.

use crate::error::{DecodeError, DecodeResult};

/// Name of every octree root.
pub const ROOT_NAME: &str = "r";

/// Check that `name` is `r` followed by octant digits.
///
/// # Errors
///
/// Returns an error if the name does not start with `r` or contains a
/// character other than `0`-`7` after it.
pub fn validate_name(name: &str) -> DecodeResult<()> {
    let Some(digits) = name.strip_prefix(ROOT_NAME) else {
        return Err(DecodeError::InvalidFormat {
            context: "node name",
            detail: format!("'{name}' does not start with '{ROOT_NAME}'"),
        });
    };
    if let Some(bad) = digits.bytes().find(|b| !(b'0'..=b'7').contains(b)) {
        return Err(DecodeError::InvalidFormat {
            context: "node name",
            detail: format!("'{name}' contains non-octant character '{}'", bad as char),
        });
    }
    Ok(())
}

/// Depth of a node, the root being level 0.
#[must_use]
pub fn level_of(name: &str) -> u32 {
    u32::try_from(name.len().saturating_sub(1)).unwrap_or(u32::MAX)
}

/// Name of child `index` of `parent`.
///
/// # Errors
///
/// Returns an error if `index` is not a valid octant.
pub fn child_name(parent: &str, index: u8) -> DecodeResult<String> {
    if index >= 8 {
        return Err(DecodeError::IndexOutOfBounds {
            index: usize::from(index),
            len: 8,
        });
    }
    let mut name = String::with_capacity(parent.len() + 1);
    name.push_str(parent);
    name.push(char::from(b'0' + index));
    Ok(name)
}

/// Octant index of a node within its parent, or `None` for the root.
#[must_use]
pub fn child_index(name: &str) -> Option<u8> {
    if name.len() <= ROOT_NAME.len() {
        return None;
    }
    let last = *name.as_bytes().last()?;
    (b'0'..=b'7').contains(&last).then(|| last - b'0')
}

/// Name of the parent node, or `None` for the root.
#[must_use]
pub fn parent_name(name: &str) -> Option<&str> {
    (name.len() > ROOT_NAME.len()).then(|| &name[..name.len() - 1])
}

/// Directory path of the hierarchy chunk containing `name`.
///
/// The digits after the root are split into groups of `step` and joined
/// with `/`, so with a step of 5 the node `r0123456` lives under `r/01234`.
/// Incomplete trailing groups are dropped.
#[must_use]
pub fn hierarchy_path(name: &str, step: u32) -> String {
    let digits = name.get(ROOT_NAME.len()..).unwrap_or("");
    let step = usize::try_from(step.max(1)).unwrap_or(usize::MAX);

    let mut path = String::from(ROOT_NAME);
    for part in digits.as_bytes().chunks_exact(step) {
        path.push('/');
        // Digits are ASCII, so every chunk is valid UTF-8.
        path.push_str(std::str::from_utf8(part).unwrap_or_default());
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("r").is_ok());
        assert!(validate_name("r0717").is_ok());
        assert!(validate_name("x01").is_err());
        assert!(validate_name("r08").is_err());
    }

    #[test]
    fn test_child_and_parent() {
        assert_eq!(child_name("r", 4).unwrap(), "r4");
        assert_eq!(child_name("r4", 0).unwrap(), "r40");
        assert!(matches!(
            child_name("r", 8),
            Err(DecodeError::IndexOutOfBounds { index: 8, len: 8 })
        ));
        assert_eq!(parent_name("r40"), Some("r4"));
        assert_eq!(parent_name("r"), None);
        assert_eq!(child_index("r40"), Some(0));
        assert_eq!(child_index("r47"), Some(7));
        assert_eq!(child_index("r"), None);
    }

    #[test]
    fn test_level() {
        assert_eq!(level_of("r"), 0);
        assert_eq!(level_of("r012"), 3);
    }

    #[test]
    fn test_hierarchy_path() {
        assert_eq!(hierarchy_path("r", 5), "r");
        assert_eq!(hierarchy_path("r0123", 5), "r");
        assert_eq!(hierarchy_path("r01234", 5), "r/01234");
        assert_eq!(hierarchy_path("r0123456", 5), "r/01234");
        assert_eq!(hierarchy_path("r0123456701", 5), "r/01234/56701");
        assert_eq!(hierarchy_path("r012", 1), "r/0/1/2");
    }

    proptest! {
        #[test]
        fn hierarchy_path_depth_matches_step(digits in "[0-7]{0,20}", step in 1u32..8) {
            let name = format!("r{digits}");
            let path = hierarchy_path(&name, step);
            let groups = path.split('/').count() - 1;
            prop_assert_eq!(groups, digits.len() / step as usize);
            prop_assert!(name.starts_with(&path.replace('/', "")));
        }
    }
}
