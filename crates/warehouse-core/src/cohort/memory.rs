use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cohort::filter::{matches_any, PropertyGroup};
use crate::cohort::model::{CalculationState, Cohort, Person};
use crate::cohort::store::CohortStore;
use crate::store::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    persons: Vec<Person>,
    cohorts: HashMap<i64, Cohort>,
    members: HashMap<i64, BTreeSet<i64>>,
}

/// Process-local cohort store, used for embedding and in tests.
#[derive(Debug, Default)]
pub struct MemoryCohortStore {
    state: Mutex<MemoryState>,
}

impl MemoryCohortStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::InvalidData("memory store lock poisoned".to_string()))
    }

    pub fn add_person(&self, person: Person) -> Result<(), StoreError> {
        self.lock()?.persons.push(person);
        Ok(())
    }

    pub fn add_cohort(&self, cohort: Cohort) -> Result<(), StoreError> {
        self.lock()?.cohorts.insert(cohort.id, cohort);
        Ok(())
    }

    /// Current members in ascending id order.
    pub fn members(&self, cohort_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .lock()?
            .members
            .get(&cohort_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }

    fn persons_where(
        &self,
        team_id: i64,
        pred: impl Fn(&Person) -> bool,
    ) -> Result<Vec<i64>, StoreError> {
        let state = self.lock()?;
        let ids: BTreeSet<i64> = state
            .persons
            .iter()
            .filter(|p| p.team_id == team_id && pred(p))
            .map(|p| p.id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl CohortStore for MemoryCohortStore {
    async fn cohort(&self, team_id: i64, cohort_id: i64) -> Result<Option<Cohort>, StoreError> {
        Ok(self
            .lock()?
            .cohorts
            .get(&cohort_id)
            .filter(|c| c.team_id == team_id && !c.deleted)
            .cloned())
    }

    async fn persons_by_distinct_ids(
        &self,
        team_id: i64,
        distinct_ids: &[String],
    ) -> Result<Vec<i64>, StoreError> {
        self.persons_where(team_id, |p| p.distinct_ids.iter().any(|d| distinct_ids.contains(d)))
    }

    async fn persons_by_emails(&self, team_id: i64, emails: &[String]) -> Result<Vec<i64>, StoreError> {
        self.persons_where(team_id, |p| {
            p.email().is_some_and(|email| emails.iter().any(|e| e == email))
        })
    }

    async fn persons_matching(
        &self,
        team_id: i64,
        groups: &[PropertyGroup],
    ) -> Result<Vec<i64>, StoreError> {
        self.persons_where(team_id, |p| matches_any(groups, &p.properties))
    }

    async fn add_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let members = state.members.entry(cohort_id).or_default();
        Ok(person_ids.iter().filter(|id| members.insert(**id)).count())
    }

    async fn replace_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .members
            .insert(cohort_id, person_ids.iter().copied().collect());
        Ok(())
    }

    async fn member_count(&self, cohort_id: i64) -> Result<i64, StoreError> {
        Ok(self.lock()?.members.get(&cohort_id).map_or(0, |m| m.len() as i64))
    }

    async fn save_calculation_state(&self, cohort: &Cohort) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let stored = state
            .cohorts
            .get_mut(&cohort.id)
            .ok_or(StoreError::MissingCohort(cohort.id))?;
        stored.state = cohort.state;
        stored.count = cohort.count;
        stored.calculation_started_at = cohort.calculation_started_at;
        stored.last_calculation = cohort.last_calculation;
        stored.errors_calculating = cohort.errors_calculating;
        Ok(())
    }

    async fn claim_calculation(
        &self,
        cohort_id: i64,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let stored = state
            .cohorts
            .get_mut(&cohort_id)
            .ok_or(StoreError::MissingCohort(cohort_id))?;
        let claimable = match stored.state {
            CalculationState::Idle => true,
            CalculationState::Calculating => stale_before.is_some_and(|cutoff| {
                stored.calculation_started_at.map_or(true, |started| started < cutoff)
            }),
        };
        if claimable {
            stored.state = CalculationState::Calculating;
            stored.calculation_started_at = Some(now);
        }
        Ok(claimable)
    }
}
