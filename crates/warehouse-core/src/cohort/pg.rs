use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::cohort::filter::PropertyGroup;
use crate::cohort::model::{CalculationState, Cohort};
use crate::cohort::store::CohortStore;
use crate::sql::render::{render_cohort_match_sql, SqlParam};
use crate::store::StoreError;

const COHORT_COLUMNS: &str = "id::bigint, team_id::bigint, name, groups, is_static, is_calculating, \
     count::bigint, last_calculation, errors_calculating::bigint, deleted, calculation_started_at";

const ADD_MEMBERS_SQL: &str = "INSERT INTO posthog_cohortpeople (cohort_id, person_id)
SELECT $1::bigint, candidate.person_id
FROM UNNEST($2::bigint[]) AS candidate(person_id)
WHERE NOT EXISTS (
    SELECT 1 FROM posthog_cohortpeople cp
    WHERE cp.cohort_id = $1::bigint AND cp.person_id = candidate.person_id
)";

const REMOVE_STALE_MEMBERS_SQL: &str = "DELETE FROM posthog_cohortpeople
WHERE cohort_id = $1::bigint AND NOT (person_id = ANY($2::bigint[]))";

const PERSONS_BY_DISTINCT_ID_SQL: &str = "SELECT DISTINCT person_id::bigint AS person_id
FROM posthog_persondistinctid
WHERE team_id = $1::bigint AND distinct_id = ANY($2::text[])";

const PERSONS_BY_EMAIL_SQL: &str = "SELECT id::bigint
FROM posthog_person
WHERE team_id = $1::bigint AND (properties ->> 'email') = ANY($2::text[])";

const SAVE_STATE_SQL: &str = "UPDATE posthog_cohort
SET is_calculating = $2, count = $3::bigint, last_calculation = $4::timestamptz, errors_calculating = $5::bigint,
    calculation_started_at = $6::timestamptz
WHERE id = $1::bigint";

const CLAIM_SQL: &str = "UPDATE posthog_cohort
SET is_calculating = true, calculation_started_at = $2::timestamptz
WHERE id = $1::bigint
  AND (
        NOT is_calculating
     OR ($3::timestamptz IS NOT NULL AND (calculation_started_at IS NULL OR calculation_started_at < $3::timestamptz))
  )";

/// Which dynamic cohorts are due for the background recalculation.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    /// Minimum age of the last successful calculation.
    pub min_interval: Duration,
    /// Age of a claim after which a cohort still flagged calculating is
    /// treated as abandoned.
    pub stale_after: Duration,
    /// Cohorts that failed more often than this are left alone.
    pub max_errors: u32,
    pub limit: i64,
}

/// Cohort store over the row-store tables.
pub struct PgCohortStore {
    client: Mutex<Client>,
}

impl PgCohortStore {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    pub async fn calculation_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Cohort>, StoreError> {
        let sql = format!(
            "SELECT {COHORT_COLUMNS}
FROM posthog_cohort
WHERE NOT deleted
  AND NOT is_static
  AND errors_calculating <= $1::bigint
  AND (
        (NOT is_calculating AND (last_calculation IS NULL OR last_calculation < now() - make_interval(secs => $2::double precision)))
     OR (is_calculating AND (calculation_started_at IS NULL OR calculation_started_at < now() - make_interval(secs => $3::double precision)))
  )
ORDER BY last_calculation ASC NULLS FIRST
LIMIT $4::bigint"
        );
        let client = self.client.lock().await;
        let rows = client
            .query(
                &sql,
                &[
                    &i64::from(filter.max_errors),
                    &filter.min_interval.as_secs_f64(),
                    &filter.stale_after.as_secs_f64(),
                    &filter.limit,
                ],
            )
            .await?;
        rows.iter().map(cohort_from_row).collect()
    }
}

fn cohort_from_row(row: &Row) -> Result<Cohort, StoreError> {
    let groups = match row.try_get::<_, Option<Value>>(3)? {
        Some(Value::Array(groups)) => groups,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(StoreError::InvalidData(format!(
                "cohort groups must be a list, found {}",
                other
            )))
        }
    };
    let is_calculating: bool = row.try_get(5)?;
    let errors: i64 = row.try_get(8)?;

    Ok(Cohort {
        id: row.try_get(0)?,
        team_id: row.try_get(1)?,
        name: row.try_get::<_, Option<String>>(2)?.unwrap_or_default(),
        groups,
        is_static: row.try_get(4)?,
        state: if is_calculating {
            CalculationState::Calculating
        } else {
            CalculationState::Idle
        },
        count: row.try_get(6)?,
        last_calculation: row.try_get::<_, Option<DateTime<Utc>>>(7)?,
        calculation_started_at: row.try_get::<_, Option<DateTime<Utc>>>(10)?,
        errors_calculating: u32::try_from(errors.max(0)).unwrap_or(u32::MAX),
        deleted: row.try_get(9)?,
    })
}

fn boxed_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Sync + Send> {
            match p {
                SqlParam::Int(v) => Box::new(*v),
                SqlParam::Float(v) => Box::new(*v),
                SqlParam::Text(v) => Box::new(v.clone()),
                SqlParam::TextArray(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

fn ids(rows: &[Row]) -> Result<Vec<i64>, StoreError> {
    rows.iter().map(|r| r.try_get(0).map_err(StoreError::from)).collect()
}

#[async_trait]
impl CohortStore for PgCohortStore {
    async fn cohort(&self, team_id: i64, cohort_id: i64) -> Result<Option<Cohort>, StoreError> {
        let sql = format!(
            "SELECT {COHORT_COLUMNS} FROM posthog_cohort WHERE id = $1::bigint AND team_id = $2::bigint AND NOT deleted"
        );
        let client = self.client.lock().await;
        let row = client.query_opt(&sql, &[&cohort_id, &team_id]).await?;
        row.as_ref().map(cohort_from_row).transpose()
    }

    async fn persons_by_distinct_ids(
        &self,
        team_id: i64,
        distinct_ids: &[String],
    ) -> Result<Vec<i64>, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(PERSONS_BY_DISTINCT_ID_SQL, &[&team_id, &distinct_ids])
            .await?;
        ids(&rows)
    }

    async fn persons_by_emails(&self, team_id: i64, emails: &[String]) -> Result<Vec<i64>, StoreError> {
        let client = self.client.lock().await;
        let rows = client.query(PERSONS_BY_EMAIL_SQL, &[&team_id, &emails]).await?;
        ids(&rows)
    }

    async fn persons_matching(
        &self,
        team_id: i64,
        groups: &[PropertyGroup],
    ) -> Result<Vec<i64>, StoreError> {
        let Some(query) = render_cohort_match_sql(team_id, groups) else {
            return Ok(Vec::new());
        };
        let boxed = boxed_params(&query.params);
        let params: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.client.lock().await;
        let rows = client.query(&query.sql, &params).await?;
        ids(&rows)
    }

    async fn add_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<usize, StoreError> {
        if person_ids.is_empty() {
            return Ok(0);
        }
        let client = self.client.lock().await;
        let inserted = client.execute(ADD_MEMBERS_SQL, &[&cohort_id, &person_ids]).await?;
        Ok(inserted as usize)
    }

    async fn replace_members(&self, cohort_id: i64, person_ids: &[i64]) -> Result<(), StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let removed = tx
            .execute(REMOVE_STALE_MEMBERS_SQL, &[&cohort_id, &person_ids])
            .await?;
        let added = tx.execute(ADD_MEMBERS_SQL, &[&cohort_id, &person_ids]).await?;
        tx.commit().await?;
        tracing::debug!(cohort_id, removed, added, "replaced cohort membership");
        Ok(())
    }

    async fn member_count(&self, cohort_id: i64) -> Result<i64, StoreError> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT count(*) FROM posthog_cohortpeople WHERE cohort_id = $1::bigint",
                &[&cohort_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn save_calculation_state(&self, cohort: &Cohort) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        let updated = client
            .execute(
                SAVE_STATE_SQL,
                &[
                    &cohort.id,
                    &cohort.is_calculating(),
                    &cohort.count,
                    &cohort.last_calculation,
                    &i64::from(cohort.errors_calculating),
                    &cohort.calculation_started_at,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::MissingCohort(cohort.id));
        }
        Ok(())
    }

    async fn claim_calculation(
        &self,
        cohort_id: i64,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        let updated = client
            .execute(CLAIM_SQL, &[&cohort_id, &now, &stale_before])
            .await?;
        Ok(updated == 1)
    }
}
