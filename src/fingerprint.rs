//! Directory fingerprints.
//!
//! A fingerprint is xxh3-64 over the raw bytes of the directory's importable
//! file paths, NUL-separated, in the order the filesystem listed them. It tracks the
//! file *set* only, never file contents, and is persisted between runs, so
//! the function must not depend on anything process-local.

use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

use crate::models::Fingerprint;

const SEPARATOR: &[u8] = b"\0";

/// Fingerprint an ordered list of importable file paths.
///
/// Reordering the same paths yields a different value; that only causes a
/// redundant rescan, never a missed change.
pub fn directory_fingerprint<I, P>(paths: I) -> Fingerprint
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut hasher = Xxh3::new();
    for (i, path) in paths.into_iter().enumerate() {
        if i > 0 {
            hasher.update(SEPARATOR);
        }
        hasher.update(path.as_ref().as_os_str().as_encoded_bytes());
    }
    Fingerprint(hasher.digest())
}

/// Fingerprint of a directory without importable files
pub fn empty_fingerprint() -> Fingerprint {
    directory_fingerprint(std::iter::empty::<&Path>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use xxhash_rust::xxh3::xxh3_64;

    #[test]
    fn test_empty_is_hash_of_empty_string() {
        assert_eq!(empty_fingerprint(), Fingerprint(xxh3_64(b"")));
    }

    #[test]
    fn test_matches_one_shot_hash_of_joined_paths() {
        let fp = directory_fingerprint(["/music/a.mp3", "/music/b.mp3"]);
        assert_eq!(fp, Fingerprint(xxh3_64(b"/music/a.mp3\0/music/b.mp3")));
    }

    #[test]
    fn test_order_sensitive() {
        let ab = directory_fingerprint(["/music/a.mp3", "/music/b.mp3"]);
        let ba = directory_fingerprint(["/music/b.mp3", "/music/a.mp3"]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        let split_early = directory_fingerprint(["/m/ab", "c"]);
        let split_late = directory_fingerprint(["/m/a", "bc"]);
        assert_ne!(split_early, split_late);
    }

    #[test]
    fn test_removal_changes_fingerprint() {
        let both = directory_fingerprint(["/music/a.mp3", "/music/b.mp3"]);
        let one = directory_fingerprint(["/music/a.mp3"]);
        assert_ne!(both, one);
        assert_ne!(one, empty_fingerprint());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_keep_their_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let ff = Path::new("/music").join(OsStr::from_bytes(b"\xff.mp3"));
        let fe = Path::new("/music").join(OsStr::from_bytes(b"\xfe.mp3"));
        assert_ne!(directory_fingerprint([&ff]), directory_fingerprint([&fe]));
        assert_eq!(
            directory_fingerprint([&ff]),
            Fingerprint(xxh3_64(b"/music/\xff.mp3"))
        );
    }

    proptest! {
        #[test]
        fn prop_deterministic(names in proptest::collection::vec("[a-z0-9 ._-]{1,12}", 0..16)) {
            let paths: Vec<PathBuf> = names.iter().map(|n| PathBuf::from("/lib").join(n)).collect();
            prop_assert_eq!(directory_fingerprint(&paths), directory_fingerprint(paths.clone()));
        }

        #[test]
        fn prop_distinct_lists_differ(
            a in proptest::collection::vec("[a-z0-9]{1,8}", 0..8),
            b in proptest::collection::vec("[a-z0-9]{1,8}", 0..8),
        ) {
            prop_assume!(a != b);
            let pa: Vec<PathBuf> = a.iter().map(|n| PathBuf::from("/lib").join(n)).collect();
            let pb: Vec<PathBuf> = b.iter().map(|n| PathBuf::from("/lib").join(n)).collect();
            prop_assert_ne!(directory_fingerprint(&pa), directory_fingerprint(&pb));
        }
    }
}
