//! The Pin Status record and its state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::destination::Destination;
use crate::error::PinError;

/// Maximum number of origin hints accepted per pin.
pub const MAX_ORIGINS: usize = 20;
/// Maximum length of the optional pin name.
pub const MAX_NAME_LEN: usize = 255;

/// Lifecycle state of a pin request.
///
/// The only legal forward path is `queued -> pinning -> {pinned, failed}`.
/// A replace starts a new generation back at `queued`; that reset happens in
/// [`PinStatus::replace`], never through [`Status::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Pinning,
    Pinned,
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Queued,
        Status::Pinning,
        Status::Pinned,
        Status::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Pinning => "pinning",
            Status::Pinned => "pinned",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Pinned | Status::Failed)
    }

    /// The single authoritative transition function.
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Queued, Status::Pinning)
                | (Status::Pinning, Status::Pinned)
                | (Status::Pinning, Status::Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "pinning" => Ok(Status::Pinning),
            "pinned" => Ok(Status::Pinned),
            "failed" => Ok(Status::Failed),
            other => Err(PinError::validation(format!(
                "status: unknown value '{other}'"
            ))),
        }
    }
}

/// A pin request body as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Pin {
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            name: None,
            origins: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Checks the request body shape.
    ///
    /// Origins are not parsed: malformed hints travel to the worker, which
    /// logs and skips them.
    pub fn validate(&self) -> Result<Cid, PinError> {
        let cid = Cid::from_str(self.cid.trim())
            .map_err(|e| PinError::validation(format!("cid: invalid CID '{}': {e}", self.cid)))?;
        if self.origins.len() > MAX_ORIGINS {
            return Err(PinError::validation(format!(
                "origins: at most {MAX_ORIGINS} entries allowed, got {}",
                self.origins.len()
            )));
        }
        if let Some(name) = &self.name {
            if name.chars().count() > MAX_NAME_LEN {
                return Err(PinError::validation(format!(
                    "name: must be at most {MAX_NAME_LEN} characters"
                )));
            }
        }
        Ok(cid)
    }
}

/// The persisted, client-visible state of one pin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinStatus {
    pub request_id: String,
    pub user_id: String,
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    pub status: Status,
    pub generation: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub delegates: Vec<String>,
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
}

/// Key under `info` holding the machine-readable failure reason.
pub const INFO_FAILURE: &str = "failure";

impl PinStatus {
    /// Builds a fresh `queued` record for `pin`.
    ///
    /// `cid` is normalised to its canonical string form so that the derived
    /// destination is identical for equivalent spellings.
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        pin: Pin,
        bucket: &str,
        delegates: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, PinError> {
        let cid = pin.validate()?.to_string();
        Ok(Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            destination: Destination::for_cid(bucket, &cid),
            cid,
            name: pin.name,
            origins: pin.origins,
            meta: pin.meta,
            status: Status::Queued,
            generation: 1,
            created: now,
            updated: now,
            delegates,
            info: BTreeMap::new(),
        })
    }

    /// Starts a new generation for the same `request_id`.
    pub fn replace(&mut self, pin: Pin, now: DateTime<Utc>) -> Result<(), PinError> {
        let cid = pin.validate()?.to_string();
        self.destination = Destination::for_cid(&self.destination.bucket, &cid);
        self.cid = cid;
        self.name = pin.name;
        self.origins = pin.origins;
        self.meta = pin.meta;
        self.status = Status::Queued;
        self.generation += 1;
        self.updated = now;
        self.info.clear();
        Ok(())
    }

    /// Applies a forward transition guarded by the record generation.
    ///
    /// `expected_generation == 0` skips the generation check. Status stores
    /// call this under their own lock or transaction, which makes the pair
    /// (check, write) a compare-and-swap.
    pub fn transition_to(
        &mut self,
        next: Status,
        expected_generation: u64,
        failure: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PinError> {
        if expected_generation != 0 && expected_generation != self.generation {
            return Err(PinError::StaleGeneration {
                request_id: self.request_id.clone(),
                expected: expected_generation,
                current: self.generation,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(PinError::Conflict {
                request_id: self.request_id.clone(),
                current: self.status,
                requested: next,
            });
        }
        self.status = next;
        self.updated = now;
        match failure {
            Some(reason) if next == Status::Failed => {
                self.info.insert(INFO_FAILURE.to_owned(), reason.to_owned());
            }
            _ => {
                self.info.remove(INFO_FAILURE);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";
    const CID_2: &str = "bafkreig6ylslysmsgffjzgsrxpmftynqqg3uc6ebrrj4dhiy233wd5oyaq";

    fn record() -> PinStatus {
        PinStatus::new("req-1", "alice", Pin::new(CID), "default", vec![], Utc::now()).unwrap()
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        for from in Status::ALL {
            for to in Status::ALL {
                let legal = matches!(
                    (from, to),
                    (Status::Queued, Status::Pinning)
                        | (Status::Pinning, Status::Pinned)
                        | (Status::Pinning, Status::Failed)
                );
                assert_eq!(from.can_transition_to(to), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn new_record_is_queued_with_derived_destination() {
        let rec = record();
        assert_eq!(rec.status, Status::Queued);
        assert_eq!(rec.generation, 1);
        assert_eq!(rec.destination.bucket, "default");
        assert_eq!(rec.destination.key, format!("pickup/{CID}/{CID}.root.car"));
        assert_eq!(rec.created, rec.updated);
    }

    #[test]
    fn invalid_cid_is_a_validation_error() {
        let err = PinStatus::new("r", "u", Pin::new("not-a-cid"), "b", vec![], Utc::now())
            .unwrap_err();
        assert!(matches!(err, PinError::Validation { .. }));
    }

    #[test]
    fn malformed_origins_are_accepted() {
        let pin = Pin::new(CID).with_origins(["derp", ""]);
        assert!(pin.validate().is_ok());
    }

    #[test]
    fn too_many_origins_are_rejected() {
        let pin = Pin::new(CID).with_origins((0..=MAX_ORIGINS).map(|i| format!("/ip4/10.0.0.{i}")));
        assert!(matches!(pin.validate(), Err(PinError::Validation { .. })));
    }

    #[test]
    fn pinned_cannot_go_back_to_queued_without_replace() {
        let mut rec = record();
        rec.transition_to(Status::Pinning, 1, None, Utc::now()).unwrap();
        rec.transition_to(Status::Pinned, 1, None, Utc::now()).unwrap();
        let err = rec
            .transition_to(Status::Queued, 1, None, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            PinError::Conflict {
                current: Status::Pinned,
                requested: Status::Queued,
                ..
            }
        ));
    }

    #[test]
    fn replace_bumps_generation_and_rejects_stale_transition() {
        let mut rec = record();
        rec.transition_to(Status::Pinning, 1, None, Utc::now()).unwrap();
        rec.replace(Pin::new(CID_2), Utc::now()).unwrap();
        assert_eq!(rec.status, Status::Queued);
        assert_eq!(rec.generation, 2);
        assert_eq!(rec.cid, CID_2);
        assert!(rec.destination.key.contains(CID_2));

        let err = rec
            .transition_to(Status::Pinned, 1, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PinError::StaleGeneration { current: 2, .. }));
        assert_eq!(rec.status, Status::Queued);
    }

    #[test]
    fn failure_reason_is_recorded_and_cleared_by_replace() {
        let mut rec = record();
        rec.transition_to(Status::Pinning, 1, None, Utc::now()).unwrap();
        rec.transition_to(Status::Failed, 1, Some("storage_failed"), Utc::now())
            .unwrap();
        assert_eq!(rec.info.get(INFO_FAILURE).map(String::as_str), Some("storage_failed"));
        rec.replace(Pin::new(CID), Utc::now()).unwrap();
        assert!(rec.info.is_empty());
    }

    #[test]
    fn status_record_serializes_with_camel_case_fields() {
        let rec = record();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["destination"]["bucket"], "default");
    }
}
