use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cohort::filter::{parse_groups, FilterError};
use crate::cohort::model::{Cohort, MembershipMode};
use crate::cohort::store::CohortStore;
use crate::store::StoreError;

/// Identifiers resolved per round trip when inserting a static list.
pub const INSERT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum CohortError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cohort {0} is not static")]
    NotStatic(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalculationOutcome {
    /// Membership replaced with `count` persons.
    Recalculated { count: i64 },
    /// Static cohorts keep their list; `count` is its current size.
    StaticUnchanged { count: i64 },
    /// Another run held the calculation.
    Skipped,
}

/// Adds the persons named by `identifiers` to a static cohort.
///
/// Each identifier is matched exactly against distinct ids and, when it
/// contains `@`, against the `email` property. Unmatched entries (headers,
/// typos) are dropped without error. Membership only grows. Returns the
/// number of persons that were not already members.
pub async fn insert_users_by_list<S>(
    store: &S,
    cohort: &mut Cohort,
    identifiers: &[String],
) -> Result<usize, CohortError>
where
    S: CohortStore + ?Sized,
{
    if cohort.mode() != MembershipMode::Static {
        return Err(CohortError::NotStatic(cohort.id));
    }

    run_calculation(store, cohort, |store, cohort| async move {
        let mut added = 0;
        for batch in identifiers.chunks(INSERT_BATCH_SIZE) {
            let distinct_ids: Vec<String> = batch
                .iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            let emails: Vec<String> = distinct_ids
                .iter()
                .filter(|id| id.contains('@'))
                .cloned()
                .collect();

            let mut persons: BTreeSet<i64> = store
                .persons_by_distinct_ids(cohort.team_id, &distinct_ids)
                .await?
                .into_iter()
                .collect();
            if !emails.is_empty() {
                persons.extend(store.persons_by_emails(cohort.team_id, &emails).await?);
            }

            let persons: Vec<i64> = persons.into_iter().collect();
            added += store.add_members(cohort.id, &persons).await?;
            tracing::debug!(
                cohort_id = cohort.id,
                identifiers = batch.len(),
                matched = persons.len(),
                "inserted static cohort batch"
            );
        }
        let count = store.member_count(cohort.id).await?;
        Ok::<_, CohortError>((added, count))
    })
    .await
}

/// Recomputes membership of a dynamic cohort for its own team.
///
/// The new person set is computed first and then swapped in, so readers see
/// either the old or the new membership. Static cohorts are left untouched.
/// The cohort is idle again when this returns, whether it succeeded or not.
pub async fn recalculate<S>(store: &S, cohort: &mut Cohort) -> Result<RecalculationOutcome, CohortError>
where
    S: CohortStore + ?Sized,
{
    run_calculation(store, cohort, |store, cohort| async move {
        if cohort.mode() == MembershipMode::Static {
            let count = store.member_count(cohort.id).await?;
            return Ok::<_, CohortError>((RecalculationOutcome::StaticUnchanged { count }, count));
        }

        let groups = parse_groups(&cohort.groups)?;
        let persons = if groups.iter().all(|g| g.filters.is_empty()) {
            Vec::new()
        } else {
            store.persons_matching(cohort.team_id, &groups).await?
        };

        store.replace_members(cohort.id, &persons).await?;
        let count = persons.len() as i64;
        Ok::<_, CohortError>((RecalculationOutcome::Recalculated { count }, count))
    })
    .await
}

/// Like [`recalculate`], but first claims the cohort through the store and
/// skips when another run already holds it.
///
/// The claim is decided by the persisted cohort, not by the `cohort` snapshot.
/// A claim held by another run is only taken over when it started before
/// `stale_before`; pass `None` to never take one over.
pub async fn recalculate_exclusive<S>(
    store: &S,
    cohort: &mut Cohort,
    stale_before: Option<DateTime<Utc>>,
) -> Result<RecalculationOutcome, CohortError>
where
    S: CohortStore + ?Sized,
{
    if !store.claim_calculation(cohort.id, Utc::now(), stale_before).await? {
        tracing::info!(cohort_id = cohort.id, "cohort calculation already claimed, skipping");
        return Ok(RecalculationOutcome::Skipped);
    }
    recalculate(store, cohort).await
}

/// Runs `work` with the cohort marked calculating and always marks it idle
/// afterwards, recording the count on success and the failure otherwise.
async fn run_calculation<'a, S, F, Fut, T>(
    store: &'a S,
    cohort: &'a mut Cohort,
    work: F,
) -> Result<T, CohortError>
where
    S: CohortStore + ?Sized,
    F: FnOnce(&'a S, Cohort) -> Fut,
    Fut: std::future::Future<Output = Result<(T, i64), CohortError>> + 'a,
{
    cohort.begin_calculation(Utc::now());
    tracing::info!(cohort_id = cohort.id, team_id = cohort.team_id, "cohort calculation started");

    let result = match store.save_calculation_state(cohort).await {
        Ok(()) => work(store, cohort.clone()).await,
        Err(e) => Err(e.into()),
    };

    cohort.finish_calculation(result.as_ref().ok().map(|(_, count)| *count), Utc::now());
    let saved = store.save_calculation_state(cohort).await;

    match (result, saved) {
        (Ok((value, count)), Ok(())) => {
            tracing::info!(cohort_id = cohort.id, count, "cohort calculation finished");
            Ok(value)
        }
        (Ok(_), Err(e)) => {
            tracing::error!(cohort_id = cohort.id, "failed to store cohort state: {e}");
            Err(e.into())
        }
        (Err(e), saved) => {
            if let Err(save_err) = saved {
                tracing::error!(cohort_id = cohort.id, "failed to store cohort state: {save_err}");
            }
            tracing::warn!(
                cohort_id = cohort.id,
                errors_calculating = cohort.errors_calculating,
                "cohort calculation failed: {e}"
            );
            Err(e)
        }
    }
}
