use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

const SEARCH_PATH: &str = "PATH";

/// Name of the search-path variable as the current process spells it.
///
/// Windows environments commonly carry `Path` rather than `PATH`; the lookup
/// is case-insensitive so the existing spelling is the one that gets rewritten.
#[must_use]
pub fn search_path_var() -> OsString {
    std::env::vars_os()
        .map(|(name, _)| name)
        .find(|name| {
            name.to_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(SEARCH_PATH))
        })
        .unwrap_or_else(|| OsString::from(SEARCH_PATH))
}

/// Build a search path with `dir` in front of the entries of `current`.
///
/// # Errors
/// Returns an error when `dir` contains the platform's path separator.
pub fn prepend_search_path(
    dir: &Path,
    current: Option<&OsStr>,
) -> Result<OsString, std::env::JoinPathsError> {
    let mut entries: Vec<PathBuf> = vec![dir.to_path_buf()];
    if let Some(current) = current {
        entries.extend(std::env::split_paths(current).filter(|entry| entry != dir));
    }
    std::env::join_paths(entries)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    use super::{prepend_search_path, search_path_var};

    #[test]
    fn prepend_puts_runtime_dir_first() {
        let current = std::env::join_paths([Path::new("/usr/bin"), Path::new("/bin")])
            .expect("join test paths");

        let joined = prepend_search_path(Path::new("/opt/node/bin"), Some(&current))
            .expect("prepend should succeed");
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();

        assert_eq!(
            entries,
            vec![
                PathBuf::from("/opt/node/bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin"),
            ]
        );
    }

    #[test]
    fn prepend_does_not_duplicate_existing_entry() {
        let current = std::env::join_paths([Path::new("/opt/node/bin"), Path::new("/usr/bin")])
            .expect("join test paths");

        let joined = prepend_search_path(Path::new("/opt/node/bin"), Some(&current))
            .expect("prepend should succeed");

        assert_eq!(std::env::split_paths(&joined).count(), 2);
    }

    #[test]
    fn prepend_without_existing_path_yields_only_dir() {
        let joined =
            prepend_search_path(Path::new("/opt/node/bin"), None).expect("prepend should succeed");

        assert_eq!(joined, OsString::from("/opt/node/bin"));
    }

    #[test]
    fn search_path_var_matches_case_insensitively() {
        let name = search_path_var();

        assert!(name.to_string_lossy().eq_ignore_ascii_case("path"));
    }
}
