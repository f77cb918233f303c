//! Filtering for `list` over a user's pin records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PinError;
use crate::pin::{PinStatus, Status};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 1000;
pub const MAX_CID_FILTER: usize = 10;

/// How the `name` filter is compared against a record's name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMatch {
    #[default]
    Exact,
    Iexact,
    Partial,
    Ipartial,
}

impl TextMatch {
    pub fn parse(s: &str) -> Result<Self, PinError> {
        match s {
            "exact" => Ok(Self::Exact),
            "iexact" => Ok(Self::Iexact),
            "partial" => Ok(Self::Partial),
            "ipartial" => Ok(Self::Ipartial),
            other => Err(PinError::validation(format!(
                "match: unknown value '{other}'"
            ))),
        }
    }

    fn matches(&self, needle: &str, haystack: &str) -> bool {
        match self {
            Self::Exact => haystack == needle,
            Self::Iexact => haystack.to_lowercase() == needle.to_lowercase(),
            Self::Partial => haystack.contains(needle),
            Self::Ipartial => haystack.to_lowercase().contains(&needle.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinQuery {
    pub cids: BTreeSet<String>,
    pub name: Option<String>,
    pub text_match: TextMatch,
    /// Empty means every status.
    pub statuses: BTreeSet<Status>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for PinQuery {
    fn default() -> Self {
        Self {
            cids: BTreeSet::new(),
            name: None,
            text_match: TextMatch::default(),
            statuses: BTreeSet::new(),
            before: None,
            after: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PinQuery {
    pub fn with_status(mut self, status: Status) -> Self {
        self.statuses.insert(status);
        self
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cids.insert(cid.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), PinError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(PinError::validation(format!(
                "limit: must be between 1 and {MAX_LIMIT}"
            )));
        }
        if self.cids.len() > MAX_CID_FILTER {
            return Err(PinError::validation(format!(
                "cid: at most {MAX_CID_FILTER} values allowed"
            )));
        }
        Ok(())
    }

    pub fn matches(&self, pin: &PinStatus) -> bool {
        if !self.cids.is_empty() && !self.cids.contains(&pin.cid) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&pin.status) {
            return false;
        }
        if let Some(name) = &self.name {
            match &pin.name {
                Some(pin_name) if self.text_match.matches(name, pin_name) => {}
                _ => return false,
            }
        }
        if self.before.is_some_and(|before| pin.created >= before) {
            return false;
        }
        if self.after.is_some_and(|after| pin.created <= after) {
            return false;
        }
        true
    }

    /// Filters, sorts newest first and truncates to `limit`.
    ///
    /// Every status store funnels its candidate records through here, so
    /// ordering and counting are identical across backends.
    pub fn apply<I>(&self, records: I) -> PinResults
    where
        I: IntoIterator<Item = PinStatus>,
    {
        let mut results: Vec<PinStatus> =
            records.into_iter().filter(|p| self.matches(p)).collect();
        results.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.request_id.cmp(&a.request_id))
        });
        let count = results.len();
        results.truncate(self.limit);
        PinResults { count, results }
    }
}

/// Response body of a list call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinResults {
    pub count: usize,
    pub results: Vec<PinStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::Pin;
    use chrono::Duration;

    const CID: &str = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";

    fn at(id: &str, secs: i64) -> PinStatus {
        let t = DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        PinStatus::new(id, "u", Pin::new(CID).with_name(format!("Name-{id}")), "b", vec![], t)
            .unwrap()
    }

    #[test]
    fn newest_first_and_limited() {
        let q = PinQuery::default().with_limit(2);
        let res = q.apply(vec![at("a", 1), at("b", 3), at("c", 2)]);
        assert_eq!(res.count, 3);
        let ids: Vec<_> = res.results.iter().map(|p| p.request_id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn time_window_is_exclusive() {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let q = PinQuery {
            after: Some(base + Duration::seconds(1)),
            before: Some(base + Duration::seconds(3)),
            ..PinQuery::default()
        };
        let res = q.apply(vec![at("a", 1), at("b", 2), at("c", 3)]);
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.results[0].request_id, "b");
    }

    #[test]
    fn name_match_modes() {
        let rec = at("x", 0);
        let mut q = PinQuery {
            name: Some("name-x".into()),
            ..PinQuery::default()
        };
        assert!(!q.matches(&rec));
        q.text_match = TextMatch::Iexact;
        assert!(q.matches(&rec));
        q.name = Some("me-".into());
        q.text_match = TextMatch::Partial;
        assert!(q.matches(&rec));
        q.name = Some("ME-X".into());
        q.text_match = TextMatch::Ipartial;
        assert!(q.matches(&rec));
    }

    #[test]
    fn status_filter() {
        let q = PinQuery::default().with_status(Status::Pinned);
        assert!(!q.matches(&at("a", 0)));
        let q = PinQuery::default().with_status(Status::Queued);
        assert!(q.matches(&at("a", 0)));
    }

    #[test]
    fn limit_bounds() {
        assert!(PinQuery::default().with_limit(0).validate().is_err());
        assert!(PinQuery::default().with_limit(MAX_LIMIT + 1).validate().is_err());
        assert!(PinQuery::default().with_limit(MAX_LIMIT).validate().is_ok());
    }
}
