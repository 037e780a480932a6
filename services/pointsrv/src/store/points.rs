use super::{parse_column, write_error, SqliteStore};
use crate::model::{Point, PriorityArray};
use errors::{PointError, PointResult};
use sqlx::{sqlite::SqliteRow, Row};

const POINT_SELECT: &str = r#"
    SELECT p.uuid, p.device_uuid, p.name, p.enable, p.writable, p.cov_threshold,
           p.value_round, p.value_operation, p.input_min, p.input_max, p.scale_min,
           p.scale_max, p.tags, p.fallback_value, p.register, p.register_length,
           p.function_code, p.data_type, p.data_endian, p.write_value_once,
           pa.slots
    FROM points p
    LEFT JOIN priority_arrays pa ON pa.point_uuid = p.uuid
"#;

fn hydrate_point(row: &SqliteRow) -> PointResult<Point> {
    let slots: Option<String> = row.try_get("slots")?;
    let priority_array_write = slots
        .map(|s| serde_json::from_str::<PriorityArray>(&s))
        .transpose()?;

    Ok(Point {
        uuid: row.try_get("uuid")?,
        device_uuid: row.try_get("device_uuid")?,
        name: row.try_get("name")?,
        enable: row.try_get("enable")?,
        writable: row.try_get("writable")?,
        cov_threshold: row.try_get("cov_threshold")?,
        value_round: row.try_get("value_round")?,
        value_operation: row.try_get("value_operation")?,
        input_min: row.try_get("input_min")?,
        input_max: row.try_get("input_max")?,
        scale_min: row.try_get("scale_min")?,
        scale_max: row.try_get("scale_max")?,
        tags: row.try_get("tags")?,
        fallback_value: row.try_get("fallback_value")?,
        register: row.try_get("register")?,
        register_length: row.try_get("register_length")?,
        function_code: parse_column(row, "function_code")?,
        data_type: parse_column(row, "data_type")?,
        data_endian: parse_column(row, "data_endian")?,
        write_value_once: row.try_get("write_value_once")?,
        priority_array_write,
    })
}

impl SqliteStore {
    /// Insert a point together with its store row and, when writable, its
    /// priority array. The point is normalised in place.
    pub async fn create_point(&self, point: &mut Point) -> PointResult<()> {
        point.validate()?;
        if self.get_device(&point.device_uuid).await?.is_none() {
            return Err(PointError::not_found(format!("device {}", point.device_uuid)));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO points (
                uuid, device_uuid, name, enable, writable, cov_threshold, value_round,
                value_operation, input_min, input_max, scale_min, scale_max, tags,
                fallback_value, register, register_length, function_code, data_type,
                data_endian, write_value_once
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&point.uuid)
        .bind(&point.device_uuid)
        .bind(&point.name)
        .bind(point.enable)
        .bind(point.writable)
        .bind(point.cov_threshold)
        .bind(point.value_round)
        .bind(&point.value_operation)
        .bind(point.input_min)
        .bind(point.input_max)
        .bind(point.scale_min)
        .bind(point.scale_max)
        .bind(&point.tags)
        .bind(point.fallback_value)
        .bind(point.register)
        .bind(point.register_length)
        .bind(point.function_code.as_str())
        .bind(point.data_type.as_str())
        .bind(point.data_endian.as_str())
        .bind(point.write_value_once)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "point"))?;

        sqlx::query("INSERT INTO point_stores (point_uuid, value_raw, fault) VALUES (?, '', 0)")
            .bind(&point.uuid)
            .execute(&mut *tx)
            .await?;

        if let Some(array) = &point.priority_array_write {
            sqlx::query("INSERT INTO priority_arrays (point_uuid, slots) VALUES (?, ?)")
                .bind(&point.uuid)
                .bind(serde_json::to_string(array)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_point(&self, uuid: &str) -> PointResult<Option<Point>> {
        let row = sqlx::query(&format!("{} WHERE p.uuid = ?", POINT_SELECT))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(hydrate_point).transpose()
    }

    /// Look a point up by its network, device and point names
    pub async fn get_point_by_name(
        &self,
        network_name: &str,
        device_name: &str,
        point_name: &str,
    ) -> PointResult<Option<Point>> {
        let row = sqlx::query(&format!(
            r#"{}
            JOIN devices d ON d.uuid = p.device_uuid
            JOIN networks n ON n.uuid = d.network_uuid
            WHERE n.name = ? AND d.name = ? AND p.name = ?"#,
            POINT_SELECT
        ))
        .bind(network_name)
        .bind(device_name)
        .bind(point_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(hydrate_point).transpose()
    }

    pub async fn list_points(&self, device_uuid: &str) -> PointResult<Vec<Point>> {
        let rows = sqlx::query(&format!(
            "{} WHERE p.device_uuid = ? ORDER BY p.register",
            POINT_SELECT
        ))
        .bind(device_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hydrate_point).collect()
    }

    pub async fn list_enabled_points(&self, device_uuid: &str) -> PointResult<Vec<Point>> {
        let rows = sqlx::query(&format!(
            "{} WHERE p.device_uuid = ? AND p.enable = 1 ORDER BY p.register",
            POINT_SELECT
        ))
        .bind(device_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hydrate_point).collect()
    }

    pub async fn list_all_points(&self) -> PointResult<Vec<Point>> {
        let rows = sqlx::query(&format!("{} ORDER BY p.device_uuid, p.register", POINT_SELECT))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(hydrate_point).collect()
    }

    /// Update a point's configuration
    ///
    /// A point that becomes writable gains a priority array, one that stops
    /// being writable loses it. An existing array is left untouched; use
    /// [`SqliteStore::update_priority_value`] to change it.
    pub async fn update_point(&self, point: &mut Point) -> PointResult<()> {
        point.validate()?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE points SET
                device_uuid = ?, name = ?, enable = ?, writable = ?, cov_threshold = ?,
                value_round = ?, value_operation = ?, input_min = ?, input_max = ?,
                scale_min = ?, scale_max = ?, tags = ?, fallback_value = ?, register = ?,
                register_length = ?, function_code = ?, data_type = ?, data_endian = ?,
                write_value_once = ?
            WHERE uuid = ?
            "#,
        )
        .bind(&point.device_uuid)
        .bind(&point.name)
        .bind(point.enable)
        .bind(point.writable)
        .bind(point.cov_threshold)
        .bind(point.value_round)
        .bind(&point.value_operation)
        .bind(point.input_min)
        .bind(point.input_max)
        .bind(point.scale_min)
        .bind(point.scale_max)
        .bind(&point.tags)
        .bind(point.fallback_value)
        .bind(point.register)
        .bind(point.register_length)
        .bind(point.function_code.as_str())
        .bind(point.data_type.as_str())
        .bind(point.data_endian.as_str())
        .bind(point.write_value_once)
        .bind(&point.uuid)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "point"))?;

        if result.rows_affected() == 0 {
            return Err(PointError::not_found(format!("point {}", point.uuid)));
        }

        match &point.priority_array_write {
            Some(array) => {
                sqlx::query(
                    "INSERT INTO priority_arrays (point_uuid, slots) VALUES (?, ?) \
                     ON CONFLICT(point_uuid) DO NOTHING",
                )
                .bind(&point.uuid)
                .bind(serde_json::to_string(array)?)
                .execute(&mut *tx)
                .await?;
            },
            None => {
                sqlx::query("DELETE FROM priority_arrays WHERE point_uuid = ?")
                    .bind(&point.uuid)
                    .execute(&mut *tx)
                    .await?;
            },
        }
        tx.commit().await?;

        point.priority_array_write = self.get_priority_array(&point.uuid).await?;
        Ok(())
    }

    pub async fn delete_point(&self, uuid: &str) -> PointResult<bool> {
        let result = sqlx::query("DELETE FROM points WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use crate::model::{DataType, Device, FunctionCode, Network, Point};
    use crate::store::SqliteStore;
    use errors::PointError;

    async fn fixture() -> (SqliteStore, Device) {
        let store = SqliteStore::in_memory().await.unwrap();
        let network = Network::tcp("tcp_1", "10.0.0.5", 502);
        store.create_network(&network).await.unwrap();
        let device = Device::new(&network.uuid, "meter", 1);
        store.create_device(&device).await.unwrap();
        (store, device)
    }

    #[tokio::test]
    async fn test_create_point_creates_store_row() {
        let (store, device) = fixture().await;
        let mut point = Point::new(&device.uuid, "temp", FunctionCode::ReadHoldingRegisters, 1, 1);
        point.data_type = DataType::Float;
        store.create_point(&mut point).await.unwrap();
        assert_eq!(point.register_length, 2);

        let loaded = store.get_point(&point.uuid).await.unwrap().unwrap();
        assert_eq!(loaded, point);
        let point_store = store.get_point_store(&point.uuid).await.unwrap().unwrap();
        assert_eq!(point_store.value, None);
        assert!(!point_store.fault);
        assert!(store.get_priority_array(&point.uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writable_point_gets_fallback_array() {
        let (store, device) = fixture().await;
        let mut point = Point::new(&device.uuid, "setpoint", FunctionCode::WriteRegister, 10, 1);
        point.fallback_value = Some(21.0);
        store.create_point(&mut point).await.unwrap();

        let array = store.get_priority_array(&point.uuid).await.unwrap().unwrap();
        assert_eq!(array.highest_priority(), Some((16, 21.0)));
    }

    #[tokio::test]
    async fn test_writability_change_moves_array() {
        let (store, device) = fixture().await;
        let mut point = Point::new(&device.uuid, "p", FunctionCode::ReadHoldingRegisters, 10, 1);
        store.create_point(&mut point).await.unwrap();

        point.function_code = FunctionCode::WriteRegister;
        store.update_point(&mut point).await.unwrap();
        assert!(store.get_priority_array(&point.uuid).await.unwrap().is_some());

        point.function_code = FunctionCode::ReadInputRegisters;
        store.update_point(&mut point).await.unwrap();
        assert!(store.get_priority_array(&point.uuid).await.unwrap().is_none());
        assert!(!store.get_point(&point.uuid).await.unwrap().unwrap().writable);
    }

    #[tokio::test]
    async fn test_point_register_unique_per_function_code() {
        let (store, device) = fixture().await;
        let mut a = Point::new(&device.uuid, "a", FunctionCode::ReadHoldingRegisters, 10, 1);
        store.create_point(&mut a).await.unwrap();

        let mut b = Point::new(&device.uuid, "b", FunctionCode::ReadHoldingRegisters, 10, 1);
        assert!(matches!(
            store.create_point(&mut b).await.unwrap_err(),
            PointError::Conflict(_)
        ));

        let mut c = Point::new(&device.uuid, "c", FunctionCode::ReadInputRegisters, 10, 1);
        store.create_point(&mut c).await.unwrap();
    }

    #[tokio::test]
    async fn test_point_lookup_by_name_and_cascade() {
        let (store, device) = fixture().await;
        let mut point = Point::new(&device.uuid, "temp", FunctionCode::ReadInputRegisters, 1, 1);
        store.create_point(&mut point).await.unwrap();

        let found = store
            .get_point_by_name("tcp_1", "meter", "temp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.uuid, point.uuid);

        store.delete_device(&device.uuid).await.unwrap();
        assert!(store.get_point(&point.uuid).await.unwrap().is_none());
        assert!(store.get_point_store(&point.uuid).await.unwrap().is_none());
    }
}
