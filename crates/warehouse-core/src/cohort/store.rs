use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cohort::filter::PropertyGroup;
use crate::cohort::model::Cohort;
use crate::store::StoreError;

/// Person and membership storage behind cohort calculation.
///
/// Every lookup is scoped to one team; implementations must never return
/// persons of another team.
#[async_trait]
pub trait CohortStore: Send + Sync {
    async fn cohort(&self, team_id: i64, cohort_id: i64) -> Result<Option<Cohort>, StoreError>;

    /// Persons owning any of `distinct_ids` (exact match).
    async fn persons_by_distinct_ids(
        &self,
        team_id: i64,
        distinct_ids: &[String],
    ) -> Result<Vec<i64>, StoreError>;

    /// Persons whose `email` property equals one of `emails`.
    async fn persons_by_emails(&self, team_id: i64, emails: &[String]) -> Result<Vec<i64>, StoreError>;

    /// Persons matching any of `groups`.
    async fn persons_matching(
        &self,
        team_id: i64,
        groups: &[PropertyGroup],
    ) -> Result<Vec<i64>, StoreError>;

    /// Adds persons to the membership, skipping those already present.
    /// Returns how many were new.
    async fn add_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<usize, StoreError>;

    /// Makes the membership exactly `person_ids` in one atomic step.
    async fn replace_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<(), StoreError>;

    async fn member_count(&self, cohort_id: i64) -> Result<i64, StoreError>;

    /// Persists state, claim start, count, last calculation and error counter.
    async fn save_calculation_state(&self, cohort: &Cohort) -> Result<(), StoreError>;

    /// Atomically marks the cohort calculating as of `now`.
    ///
    /// Succeeds when the persisted cohort is idle, or when it is calculating
    /// but that claim started before `stale_before`. Without a cutoff a held
    /// claim is never taken over. Returns `false` when another run holds it.
    async fn claim_calculation(
        &self,
        cohort_id: i64,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
}
