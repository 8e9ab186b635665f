use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use crate::schema::column::ColumnSchema;
use crate::store::StoreError;
use crate::warehouse::table::{Credential, ExternalDataSource, TableFormat, WarehouseTable};

const TABLE_SELECT: &str = "SELECT t.id, t.team_id::bigint, t.name, t.format, t.url_pattern, t.columns, \
       t.row_count::bigint, t.deleted, t.deleted_at, t.created_at, t.created_by_id::bigint, \
       c.id, c.access_key, c.access_secret, s.id, s.prefix
FROM posthog_datawarehousetable t
LEFT JOIN posthog_datawarehousecredential c ON c.id = t.credential_id
LEFT JOIN posthog_externaldatasource s ON s.id = t.external_data_source_id";

const ACTIVE: &str = "(t.deleted = false OR t.deleted IS NULL)";

const SAVE_SCHEMA_SQL: &str = "UPDATE posthog_datawarehousetable
SET columns = $2, row_count = $3::bigint
WHERE id = $1";

const SOFT_DELETE_SQL: &str = "UPDATE posthog_datawarehousetable
SET deleted = true, deleted_at = $3::timestamptz
WHERE id = $1 AND team_id = $2::bigint AND (deleted = false OR deleted IS NULL)";

/// Warehouse table rows. Listing and lookups only see tables that are not
/// soft-deleted.
pub struct PgWarehouseTables {
    client: Client,
}

impl PgWarehouseTables {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn active_tables(&self, team_id: i64) -> Result<Vec<WarehouseTable>, StoreError> {
        let sql = format!("{TABLE_SELECT}\nWHERE t.team_id = $1::bigint AND {ACTIVE}\nORDER BY t.name");
        let rows = self.client.query(&sql, &[&team_id]).await?;
        rows.iter().map(table_from_row).collect()
    }

    pub async fn get(&self, team_id: i64, id: Uuid) -> Result<Option<WarehouseTable>, StoreError> {
        let sql = format!("{TABLE_SELECT}\nWHERE t.id = $1 AND t.team_id = $2::bigint AND {ACTIVE}");
        let row = self.client.query_opt(&sql, &[&id, &team_id]).await?;
        row.as_ref().map(table_from_row).transpose()
    }

    pub async fn by_url_pattern_and_source(
        &self,
        team_id: i64,
        source_id: Uuid,
        url_pattern: &str,
    ) -> Result<Option<WarehouseTable>, StoreError> {
        let sql = format!(
            "{TABLE_SELECT}\nWHERE t.team_id = $1::bigint AND t.external_data_source_id = $2 \
             AND t.url_pattern = $3 AND {ACTIVE}\nLIMIT 1"
        );
        let row = self
            .client
            .query_opt(&sql, &[&team_id, &source_id, &url_pattern])
            .await?;
        row.as_ref().map(table_from_row).transpose()
    }

    /// Persists the columns and row count set by a schema refresh.
    pub async fn save_schema(&self, table: &WarehouseTable) -> Result<(), StoreError> {
        let columns = serde_json::to_value(&table.columns)?;
        self.client
            .execute(SAVE_SCHEMA_SQL, &[&table.id, &columns, &table.row_count])
            .await?;
        Ok(())
    }

    /// Returns `false` when there was no active table to delete.
    pub async fn soft_delete(&self, team_id: i64, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let updated = self.client.execute(SOFT_DELETE_SQL, &[&id, &team_id, &now]).await?;
        Ok(updated == 1)
    }
}

fn table_from_row(row: &Row) -> Result<WarehouseTable, StoreError> {
    let format: TableFormat = row
        .try_get::<_, String>(3)?
        .parse()
        .map_err(StoreError::InvalidData)?;

    let columns: ColumnSchema = match row.try_get::<_, Option<Value>>(5)? {
        Some(Value::Null) | None => ColumnSchema::new(),
        Some(value) => serde_json::from_value(value)?,
    };

    let credential = match row.try_get::<_, Option<Uuid>>(11)? {
        Some(id) => Some(Credential {
            id,
            access_key: row.try_get(12)?,
            access_secret: row.try_get(13)?,
        }),
        None => None,
    };
    let external_data_source = match row.try_get::<_, Option<Uuid>>(14)? {
        Some(id) => Some(ExternalDataSource {
            id,
            prefix: row.try_get(15)?,
        }),
        None => None,
    };

    Ok(WarehouseTable {
        id: row.try_get(0)?,
        team_id: row.try_get(1)?,
        name: row.try_get(2)?,
        format,
        url_pattern: row.try_get(4)?,
        credential,
        external_data_source,
        columns,
        row_count: row.try_get(6)?,
        deleted: row.try_get::<_, Option<bool>>(7)?.unwrap_or(false),
        deleted_at: row.try_get(8)?,
        created_at: row.try_get(9)?,
        created_by_id: row.try_get(10)?,
    })
}
