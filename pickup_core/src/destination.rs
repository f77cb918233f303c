use serde::{Deserialize, Serialize};

/// Prefix under which all archives are stored.
pub const KEY_PREFIX: &str = "pickup";
/// Suffix of a finished archive object.
pub const ARCHIVE_SUFFIX: &str = ".root.car";
const STAGING_SUFFIX: &str = ".part";

/// Where the archive for a CID lives: a named bucket plus an object key.
///
/// The key is a pure function of the CID so that every request for the same
/// CID, and every redelivery of the same message, resolves to one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    pub fn for_cid(bucket: &str, cid: &str) -> Self {
        Self {
            bucket: bucket.to_owned(),
            key: archive_key(cid),
        }
    }

    /// A per-attempt staging key next to the final key.
    pub fn staging_key(&self, attempt_id: &str) -> String {
        format!("{}.{attempt_id}{STAGING_SUFFIX}", self.key)
    }
}

pub fn archive_key(cid: &str) -> String {
    format!("{KEY_PREFIX}/{cid}/{cid}{ARCHIVE_SUFFIX}")
}

/// Returns true for keys written by an unfinished transfer.
pub fn is_staging_key(key: &str) -> bool {
    key.starts_with(KEY_PREFIX) && key.ends_with(STAGING_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = Destination::for_cid("b", "bafy1");
        let b = Destination::for_cid("b", "bafy1");
        assert_eq!(a, b);
        assert_eq!(a.key, "pickup/bafy1/bafy1.root.car");
    }

    #[test]
    fn staging_keys_are_distinct_per_attempt() {
        let d = Destination::for_cid("b", "bafy1");
        let s1 = d.staging_key("one");
        let s2 = d.staging_key("two");
        assert_ne!(s1, s2);
        assert!(is_staging_key(&s1));
        assert!(!is_staging_key(&d.key));
    }
}
