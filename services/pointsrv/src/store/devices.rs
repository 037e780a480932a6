use super::{write_error, SqliteStore};
use crate::model::Device;
use errors::{PointError, PointResult};
use sqlx::{sqlite::SqliteRow, Row};

const DEVICE_COLUMNS: &str = r#"
    uuid, network_uuid, name, enable, fault, tags, address, zero_based,
    ping_point, supports_multiple_rw
"#;

fn hydrate_device(row: &SqliteRow) -> PointResult<Device> {
    Ok(Device {
        uuid: row.try_get("uuid")?,
        network_uuid: row.try_get("network_uuid")?,
        name: row.try_get("name")?,
        enable: row.try_get("enable")?,
        fault: row.try_get("fault")?,
        tags: row.try_get("tags")?,
        address: row.try_get("address")?,
        zero_based: row.try_get("zero_based")?,
        ping_point: row.try_get("ping_point")?,
        supports_multiple_rw: row.try_get("supports_multiple_rw")?,
    })
}

impl SqliteStore {
    pub async fn create_device(&self, device: &Device) -> PointResult<()> {
        device.validate()?;
        if self.get_network(&device.network_uuid).await?.is_none() {
            return Err(PointError::not_found(format!(
                "network {}",
                device.network_uuid
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO devices ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            DEVICE_COLUMNS
        ))
        .bind(&device.uuid)
        .bind(&device.network_uuid)
        .bind(&device.name)
        .bind(device.enable)
        .bind(device.fault)
        .bind(&device.tags)
        .bind(device.address)
        .bind(device.zero_based)
        .bind(&device.ping_point)
        .bind(device.supports_multiple_rw)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "device"))?;
        Ok(())
    }

    pub async fn get_device(&self, uuid: &str) -> PointResult<Option<Device>> {
        let row = sqlx::query(&format!("SELECT {} FROM devices WHERE uuid = ?", DEVICE_COLUMNS))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(hydrate_device).transpose()
    }

    pub async fn list_devices(&self, network_uuid: &str) -> PointResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM devices WHERE network_uuid = ? ORDER BY address",
            DEVICE_COLUMNS
        ))
        .bind(network_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hydrate_device).collect()
    }

    pub async fn list_enabled_devices(&self, network_uuid: &str) -> PointResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM devices WHERE network_uuid = ? AND enable = 1 ORDER BY address",
            DEVICE_COLUMNS
        ))
        .bind(network_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hydrate_device).collect()
    }

    pub async fn update_device(&self, device: &Device) -> PointResult<()> {
        device.validate()?;
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                network_uuid = ?, name = ?, enable = ?, tags = ?, address = ?,
                zero_based = ?, ping_point = ?, supports_multiple_rw = ?
            WHERE uuid = ?
            "#,
        )
        .bind(&device.network_uuid)
        .bind(&device.name)
        .bind(device.enable)
        .bind(&device.tags)
        .bind(device.address)
        .bind(device.zero_based)
        .bind(&device.ping_point)
        .bind(device.supports_multiple_rw)
        .bind(&device.uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "device"))?;

        if result.rows_affected() == 0 {
            return Err(PointError::not_found(format!("device {}", device.uuid)));
        }
        Ok(())
    }

    pub async fn delete_device(&self, uuid: &str) -> PointResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the fault flag; returns false when it already had that value
    pub async fn set_device_fault(&self, uuid: &str, fault: bool) -> PointResult<bool> {
        let result = sqlx::query("UPDATE devices SET fault = ? WHERE uuid = ? AND fault != ?")
            .bind(fault)
            .bind(uuid)
            .bind(fault)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
