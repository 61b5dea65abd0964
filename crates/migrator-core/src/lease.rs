//! Advisory migration lease stored in a volume's annotations.
//!
//! A replica that starts migrating a volume writes its identity and the
//! current time into two annotations. Any other replica treats the volume
//! as taken until the lease is older than twice the migration's declared
//! timeout budget.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::{CoreError, Result};

pub const LEASE_HOLDER_ANNOTATION: &str = "io.enndata.hppvtocsipv/updatingPipeline";
pub const LEASE_START_ANNOTATION: &str = "io.enndata.hppvtocsipv/updatingPipelineStartTime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub start: DateTime<Utc>,
}

/// What a replica may do with a volume given the lease currently on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseClaim {
    /// No lease is recorded.
    Vacant,
    /// The lease already names this replica.
    HeldBySelf,
    /// Another replica holds a lease that has outlived its budget.
    Stale { holder: String, age: TimeDelta },
    /// Another replica holds a live lease.
    Contended { holder: String, age: TimeDelta },
}

impl LeaseClaim {
    /// Whether the caller may (re)write the lease and continue.
    #[must_use]
    pub fn may_acquire(&self) -> bool {
        !matches!(self, Self::Contended { .. })
    }
}

impl Lease {
    #[must_use]
    pub fn new(holder: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            holder: holder.into(),
            start,
        }
    }

    /// Read the lease recorded on a volume.
    ///
    /// A lease exists when the start annotation is present and non-empty.
    /// A missing holder is read as an empty identity, which never matches a
    /// real replica.
    ///
    /// # Errors
    ///
    /// Returns an error if the start annotation is not a timestamp.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Option<Self>> {
        let Some(annotations) = meta.annotations.as_ref() else {
            return Ok(None);
        };
        let Some(raw_start) = annotations
            .get(LEASE_START_ANNOTATION)
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };

        let start = parse_start(raw_start).map_err(|source| CoreError::MalformedLeaseStart {
            volume: meta.name.clone().unwrap_or_default(),
            value: raw_start.clone(),
            source,
        })?;
        let holder = annotations
            .get(LEASE_HOLDER_ANNOTATION)
            .cloned()
            .unwrap_or_default();

        Ok(Some(Self { holder, start }))
    }

    /// Write both lease annotations.
    pub fn apply_to(&self, meta: &mut ObjectMeta) {
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(LEASE_HOLDER_ANNOTATION.to_string(), self.holder.clone());
        annotations.insert(LEASE_START_ANNOTATION.to_string(), format_start(self.start));
    }

    /// Remove both lease annotations, dropping the map when it ends up empty.
    pub fn clear_from(meta: &mut ObjectMeta) {
        if let Some(annotations) = meta.annotations.as_mut() {
            annotations.remove(LEASE_HOLDER_ANNOTATION);
            annotations.remove(LEASE_START_ANNOTATION);
            if annotations.is_empty() {
                meta.annotations = None;
            }
        }
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.start)
    }

    /// A lease is stale once it is strictly older than twice `budget`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, budget: Duration) -> bool {
        TimeDelta::from_std(budget.saturating_mul(2)).is_ok_and(|limit| self.age(now) > limit)
    }

    /// Decide whether `identity` may take over a volume carrying `current`.
    #[must_use]
    pub fn evaluate(
        current: Option<&Self>,
        identity: &str,
        now: DateTime<Utc>,
        budget: Duration,
    ) -> LeaseClaim {
        match current {
            None => LeaseClaim::Vacant,
            Some(lease) if lease.holder == identity => LeaseClaim::HeldBySelf,
            Some(lease) if lease.is_stale(now, budget) => LeaseClaim::Stale {
                holder: lease.holder.clone(),
                age: lease.age(now),
            },
            Some(lease) => LeaseClaim::Contended {
                holder: lease.holder.clone(),
                age: lease.age(now),
            },
        }
    }
}

/// Lease start times are stored as JSON strings, quotes included.
fn format_start(start: DateTime<Utc>) -> String {
    serde_json::Value::String(start.to_rfc3339_opts(SecondsFormat::Nanos, true)).to_string()
}

fn parse_start(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let unquoted = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
    DateTime::parse_from_rfc3339(unquoted.trim()).map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, min, sec)
            .single()
            .expect("valid timestamp")
    }

    fn meta_with(annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some("pv-data".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn lease_round_trips_through_annotations() -> anyhow::Result<()> {
        let mut meta = ObjectMeta::default();
        let lease = Lease::new("replica-a", at(12, 0, 0));

        lease.apply_to(&mut meta);

        let stored = meta
            .annotations
            .as_ref()
            .and_then(|a| a.get(LEASE_START_ANNOTATION))
            .cloned()
            .unwrap_or_default();
        assert!(stored.starts_with('"') && stored.ends_with('"'));
        assert_eq!(Lease::from_meta(&meta)?, Some(lease));
        Ok(())
    }

    #[test]
    fn bare_rfc3339_start_is_accepted() -> anyhow::Result<()> {
        let meta = meta_with(&[
            (LEASE_HOLDER_ANNOTATION, "replica-b"),
            (LEASE_START_ANNOTATION, "2024-05-01T20:00:00+08:00"),
        ]);

        let lease = Lease::from_meta(&meta)?.expect("lease should be present");

        assert_eq!(lease.holder, "replica-b");
        assert_eq!(lease.start, at(12, 0, 0));
        Ok(())
    }

    #[test]
    fn missing_or_empty_start_means_no_lease() -> anyhow::Result<()> {
        assert_eq!(Lease::from_meta(&ObjectMeta::default())?, None);
        assert_eq!(
            Lease::from_meta(&meta_with(&[(LEASE_HOLDER_ANNOTATION, "replica-a")]))?,
            None
        );
        assert_eq!(
            Lease::from_meta(&meta_with(&[(LEASE_START_ANNOTATION, "")]))?,
            None
        );
        Ok(())
    }

    #[test]
    fn malformed_start_is_an_error() {
        let meta = meta_with(&[
            (LEASE_HOLDER_ANNOTATION, "replica-a"),
            (LEASE_START_ANNOTATION, "\"yesterday\""),
        ]);

        let err = Lease::from_meta(&meta).expect_err("should reject timestamp");

        assert!(matches!(err, CoreError::MalformedLeaseStart { ref volume, .. } if volume == "pv-data"));
    }

    #[test]
    fn clearing_removes_both_fields_and_empty_map() {
        let mut meta = ObjectMeta::default();
        Lease::new("replica-a", at(12, 0, 0)).apply_to(&mut meta);

        Lease::clear_from(&mut meta);

        assert!(meta.annotations.is_none());
    }

    #[test]
    fn clearing_keeps_unrelated_annotations() {
        let mut meta = meta_with(&[("team", "storage")]);
        Lease::new("replica-a", at(12, 0, 0)).apply_to(&mut meta);

        Lease::clear_from(&mut meta);

        let annotations = meta.annotations.expect("annotations kept");
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.get("team").map(String::as_str), Some("storage"));
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let budget = Duration::from_secs(60);
        let lease = Lease::new("replica-b", at(12, 0, 0));

        assert!(!lease.is_stale(at(12, 1, 59), budget));
        assert!(!lease.is_stale(at(12, 2, 0), budget));
        assert!(lease.is_stale(at(12, 2, 1), budget));
    }

    #[test]
    fn lease_from_the_future_is_never_stale() {
        let lease = Lease::new("replica-b", at(13, 0, 0));

        assert!(!lease.is_stale(at(12, 0, 0), Duration::from_secs(1)));
    }

    #[test]
    fn own_lease_never_blocks() {
        let lease = Lease::new("replica-a", at(12, 0, 0));

        let claim = Lease::evaluate(Some(&lease), "replica-a", at(12, 0, 1), Duration::from_secs(60));

        assert_eq!(claim, LeaseClaim::HeldBySelf);
        assert!(claim.may_acquire());
    }

    #[test]
    fn foreign_lease_blocks_until_stale() {
        let lease = Lease::new("replica-b", at(12, 0, 0));
        let budget = Duration::from_secs(60);

        let live = Lease::evaluate(Some(&lease), "replica-a", at(12, 1, 59), budget);
        let stale = Lease::evaluate(Some(&lease), "replica-a", at(12, 2, 1), budget);

        assert!(matches!(live, LeaseClaim::Contended { ref holder, .. } if holder == "replica-b"));
        assert!(!live.may_acquire());
        assert!(matches!(stale, LeaseClaim::Stale { .. }));
        assert!(stale.may_acquire());
    }

    #[test]
    fn absent_lease_is_vacant() {
        let claim = Lease::evaluate(None, "replica-a", at(12, 0, 0), Duration::from_secs(60));

        assert_eq!(claim, LeaseClaim::Vacant);
    }
}
