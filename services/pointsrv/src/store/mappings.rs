use super::{parse_column, write_error, SqliteStore};
use crate::model::{MapType, Mapping, MappingState};
use errors::{PointError, PointResult};
use sqlx::{sqlite::SqliteRow, Row};

const MAPPING_SELECT: &str =
    "SELECT uuid, point_uuid, mapped_point_uuid, type, mapping_state FROM mappings";

fn hydrate_mapping(row: &SqliteRow) -> PointResult<Mapping> {
    Ok(Mapping {
        uuid: row.try_get("uuid")?,
        point_uuid: row.try_get("point_uuid")?,
        mapped_point_uuid: row.try_get("mapped_point_uuid")?,
        map_type: parse_column(row, "type")?,
        mapping_state: parse_column(row, "mapping_state")?,
    })
}

impl SqliteStore {
    pub async fn create_mapping(&self, mapping: &Mapping) -> PointResult<()> {
        if mapping.mapped_point_uuid.is_empty() {
            return Err(PointError::validation("mapped_point_uuid is required"));
        }
        if self.get_point(&mapping.point_uuid).await?.is_none() {
            return Err(PointError::not_found(format!("point {}", mapping.point_uuid)));
        }

        sqlx::query(
            "INSERT INTO mappings (uuid, point_uuid, mapped_point_uuid, type, mapping_state) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&mapping.uuid)
        .bind(&mapping.point_uuid)
        .bind(&mapping.mapped_point_uuid)
        .bind(mapping.map_type.as_str())
        .bind(mapping.mapping_state.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "mapping"))?;
        Ok(())
    }

    pub async fn get_mapping_by_point(&self, point_uuid: &str) -> PointResult<Option<Mapping>> {
        let row = sqlx::query(&format!("{} WHERE point_uuid = ?", MAPPING_SELECT))
            .bind(point_uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(hydrate_mapping).transpose()
    }

    pub async fn get_mapping_by_mapped_point(
        &self,
        mapped_point_uuid: &str,
        map_type: MapType,
    ) -> PointResult<Option<Mapping>> {
        let row = sqlx::query(&format!(
            "{} WHERE mapped_point_uuid = ? AND type = ?",
            MAPPING_SELECT
        ))
        .bind(mapped_point_uuid)
        .bind(map_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(hydrate_mapping).transpose()
    }

    pub async fn list_mappings(&self) -> PointResult<Vec<Mapping>> {
        let rows = sqlx::query(MAPPING_SELECT).fetch_all(&self.pool).await?;
        rows.iter().map(hydrate_mapping).collect()
    }

    pub async fn set_mapping_state(&self, uuid: &str, state: MappingState) -> PointResult<bool> {
        let result = sqlx::query("UPDATE mappings SET mapping_state = ? WHERE uuid = ?")
            .bind(state.as_str())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_mapping(&self, uuid: &str) -> PointResult<bool> {
        let result = sqlx::query("DELETE FROM mappings WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
