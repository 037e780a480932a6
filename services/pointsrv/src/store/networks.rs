use super::{parse_column, write_error, SqliteStore};
use crate::model::{Network, NetworkType};
use errors::{PointError, PointResult};
use sqlx::{sqlite::SqliteRow, Row};

const NETWORK_COLUMNS: &str = r#"
    uuid, name, type, enable, fault, tags, rtu_port, rtu_speed, rtu_stop_bits,
    rtu_parity, rtu_byte_size, tcp_ip, tcp_port, timeout,
    polling_interval_runtime, point_interval_ms_between_points
"#;

fn hydrate_network(row: &SqliteRow) -> PointResult<Network> {
    Ok(Network {
        uuid: row.try_get("uuid")?,
        name: row.try_get("name")?,
        network_type: parse_column(row, "type")?,
        enable: row.try_get("enable")?,
        fault: row.try_get("fault")?,
        tags: row.try_get("tags")?,
        rtu_port: row.try_get("rtu_port")?,
        rtu_speed: row.try_get("rtu_speed")?,
        rtu_stop_bits: row.try_get("rtu_stop_bits")?,
        rtu_parity: parse_column(row, "rtu_parity")?,
        rtu_byte_size: row.try_get("rtu_byte_size")?,
        tcp_ip: row.try_get("tcp_ip")?,
        tcp_port: row.try_get("tcp_port")?,
        timeout: row.try_get::<i64, _>("timeout")? as u64,
        polling_interval_runtime: row.try_get::<i64, _>("polling_interval_runtime")? as u64,
        point_interval_ms_between_points: row
            .try_get::<i64, _>("point_interval_ms_between_points")?
            as u64,
    })
}

impl SqliteStore {
    pub async fn create_network(&self, network: &Network) -> PointResult<()> {
        network.validate()?;
        sqlx::query(&format!(
            "INSERT INTO networks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            NETWORK_COLUMNS
        ))
        .bind(&network.uuid)
        .bind(&network.name)
        .bind(network.network_type.as_str())
        .bind(network.enable)
        .bind(network.fault)
        .bind(&network.tags)
        .bind(&network.rtu_port)
        .bind(network.rtu_speed)
        .bind(network.rtu_stop_bits)
        .bind(network.rtu_parity.as_str())
        .bind(network.rtu_byte_size)
        .bind(&network.tcp_ip)
        .bind(network.tcp_port)
        .bind(network.timeout as i64)
        .bind(network.polling_interval_runtime as i64)
        .bind(network.point_interval_ms_between_points as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "network"))?;
        Ok(())
    }

    pub async fn get_network(&self, uuid: &str) -> PointResult<Option<Network>> {
        let row = sqlx::query(&format!("SELECT {} FROM networks WHERE uuid = ?", NETWORK_COLUMNS))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(hydrate_network).transpose()
    }

    pub async fn get_network_by_name(&self, name: &str) -> PointResult<Option<Network>> {
        let row = sqlx::query(&format!("SELECT {} FROM networks WHERE name = ?", NETWORK_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(hydrate_network).transpose()
    }

    pub async fn list_networks(&self) -> PointResult<Vec<Network>> {
        let rows = sqlx::query(&format!("SELECT {} FROM networks ORDER BY name", NETWORK_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(hydrate_network).collect()
    }

    /// Enabled networks of one transport variant
    pub async fn list_enabled_networks(&self, network_type: NetworkType) -> PointResult<Vec<Network>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM networks WHERE type = ? AND enable = 1 ORDER BY name",
            NETWORK_COLUMNS
        ))
        .bind(network_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hydrate_network).collect()
    }

    /// Enabled network row, `None` once it is deleted or disabled
    pub async fn get_enabled_network(&self, uuid: &str) -> PointResult<Option<Network>> {
        Ok(self.get_network(uuid).await?.filter(|n| n.enable))
    }

    pub async fn update_network(&self, network: &Network) -> PointResult<()> {
        network.validate()?;
        let result = sqlx::query(
            r#"
            UPDATE networks SET
                name = ?, type = ?, enable = ?, tags = ?, rtu_port = ?, rtu_speed = ?,
                rtu_stop_bits = ?, rtu_parity = ?, rtu_byte_size = ?, tcp_ip = ?, tcp_port = ?,
                timeout = ?, polling_interval_runtime = ?, point_interval_ms_between_points = ?
            WHERE uuid = ?
            "#,
        )
        .bind(&network.name)
        .bind(network.network_type.as_str())
        .bind(network.enable)
        .bind(&network.tags)
        .bind(&network.rtu_port)
        .bind(network.rtu_speed)
        .bind(network.rtu_stop_bits)
        .bind(network.rtu_parity.as_str())
        .bind(network.rtu_byte_size)
        .bind(&network.tcp_ip)
        .bind(network.tcp_port)
        .bind(network.timeout as i64)
        .bind(network.polling_interval_runtime as i64)
        .bind(network.point_interval_ms_between_points as i64)
        .bind(&network.uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "network"))?;

        if result.rows_affected() == 0 {
            return Err(PointError::not_found(format!("network {}", network.uuid)));
        }
        Ok(())
    }

    /// Delete a network with its devices and points
    pub async fn delete_network(&self, uuid: &str) -> PointResult<bool> {
        let result = sqlx::query("DELETE FROM networks WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the fault flag; returns false when it already had that value
    pub async fn set_network_fault(&self, uuid: &str, fault: bool) -> PointResult<bool> {
        let result = sqlx::query("UPDATE networks SET fault = ? WHERE uuid = ? AND fault != ?")
            .bind(fault)
            .bind(uuid)
            .bind(fault)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use crate::model::{Network, NetworkType};
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn test_network_crud() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut network = Network::rtu("rtu_1", "/dev/ttyUSB0");
        store.create_network(&network).await.unwrap();

        let loaded = store.get_network(&network.uuid).await.unwrap().unwrap();
        assert_eq!(loaded, network);

        network.rtu_speed = 19200;
        store.update_network(&network).await.unwrap();
        let loaded = store.get_network_by_name("rtu_1").await.unwrap().unwrap();
        assert_eq!(loaded.rtu_speed, 19200);

        assert!(store.delete_network(&network.uuid).await.unwrap());
        assert!(store.get_network(&network.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_constraints_are_conflicts() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_network(&Network::rtu("rtu_1", "/dev/ttyUSB0"))
            .await
            .unwrap();

        let same_name = Network::rtu("rtu_1", "/dev/ttyUSB1");
        let err = store.create_network(&same_name).await.unwrap_err();
        assert!(matches!(err, errors::PointError::Conflict(_)));

        let same_port = Network::rtu("rtu_2", "/dev/ttyUSB0");
        let err = store.create_network(&same_port).await.unwrap_err();
        assert!(matches!(err, errors::PointError::Conflict(_)));

        store
            .create_network(&Network::tcp("tcp_1", "10.0.0.5", 502))
            .await
            .unwrap();
        let same_socket = Network::tcp("tcp_2", "10.0.0.5", 502);
        assert!(store.create_network(&same_socket).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_network_rejected_before_insert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut network = Network::rtu("rtu_1", "/dev/ttyUSB0");
        network.rtu_port = None;
        assert!(store.create_network(&network).await.unwrap_err().is_validation());
        assert!(store.list_networks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_networks_and_fault_transitions() {
        let store = SqliteStore::in_memory().await.unwrap();
        let rtu = Network::rtu("rtu_1", "/dev/ttyUSB0");
        let mut disabled = Network::rtu("rtu_2", "/dev/ttyUSB1");
        disabled.enable = false;
        let tcp = Network::tcp("tcp_1", "10.0.0.5", 502);
        for n in [&rtu, &disabled, &tcp] {
            store.create_network(n).await.unwrap();
        }

        let enabled = store.list_enabled_networks(NetworkType::Rtu).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].uuid, rtu.uuid);
        assert!(store.get_enabled_network(&disabled.uuid).await.unwrap().is_none());

        assert!(store.set_network_fault(&rtu.uuid, true).await.unwrap());
        assert!(!store.set_network_fault(&rtu.uuid, true).await.unwrap());
        assert!(store.set_network_fault(&rtu.uuid, false).await.unwrap());
    }
}
