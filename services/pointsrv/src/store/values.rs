use super::SqliteStore;
use crate::model::{PointStore, PriorityArray, FALLBACK_PRIORITY};
use chrono::Utc;
use errors::{PointError, PointResult};
use sqlx::{sqlite::SqliteRow, Row};

fn hydrate_point_store(row: &SqliteRow) -> PointResult<PointStore> {
    Ok(PointStore {
        point_uuid: row.try_get("point_uuid")?,
        value: row.try_get("value")?,
        value_original: row.try_get("value_original")?,
        value_raw: row.try_get("value_raw")?,
        fault: row.try_get("fault")?,
        fault_message: row.try_get("fault_message")?,
        ts_value: row.try_get("ts_value")?,
        ts_fault: row.try_get("ts_fault")?,
    })
}

impl SqliteStore {
    pub async fn get_point_store(&self, point_uuid: &str) -> PointResult<Option<PointStore>> {
        let row = sqlx::query(
            r#"
            SELECT point_uuid, value, value_original, value_raw, fault, fault_message,
                   ts_value, ts_fault
            FROM point_stores
            WHERE point_uuid = ?
            "#,
        )
        .bind(point_uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(hydrate_point_store).transpose()
    }

    /// Persist `store` if it is the first value, differs by at least
    /// `cov_threshold`, or clears a fault
    ///
    /// Returns whether the row changed; on change `ts_value` is stamped on
    /// both the row and `store`.
    pub async fn update_point_store_value(
        &self,
        store: &mut PointStore,
        cov_threshold: f64,
    ) -> PointResult<bool> {
        let value = store
            .value
            .ok_or_else(|| PointError::validation("point store value missing"))?;
        let ts = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE point_stores
            SET value = ?, value_original = ?, value_raw = ?, fault = 0,
                fault_message = NULL, ts_value = ?
            WHERE point_uuid = ?
              AND (value IS NULL
                   OR (abs(value - ?) >= ? AND value != ?)
                   OR fault != 0)
            "#,
        )
        .bind(value)
        .bind(store.value_original)
        .bind(&store.value_raw)
        .bind(ts)
        .bind(&store.point_uuid)
        .bind(value)
        .bind(cov_threshold)
        .bind(value)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            store.fault = false;
            store.fault_message = None;
            store.ts_value = Some(ts);
        }
        Ok(updated)
    }

    /// Put the store at fault if it was not, or if the message changed
    pub async fn update_point_store_fault(&self, store: &mut PointStore) -> PointResult<bool> {
        let ts = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE point_stores
            SET fault = 1, fault_message = ?, ts_fault = ?
            WHERE point_uuid = ? AND (fault = 0 OR fault_message IS NOT ?)
            "#,
        )
        .bind(&store.fault_message)
        .bind(ts)
        .bind(&store.point_uuid)
        .bind(&store.fault_message)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            store.fault = true;
            store.ts_fault = Some(ts);
        }
        Ok(updated)
    }

    /// Value or fault update depending on `store.fault`
    pub async fn update_point_store(
        &self,
        store: &mut PointStore,
        cov_threshold: f64,
    ) -> PointResult<bool> {
        if store.fault {
            self.update_point_store_fault(store).await
        } else {
            self.update_point_store_value(store, cov_threshold).await
        }
    }

    pub async fn get_priority_array(&self, point_uuid: &str) -> PointResult<Option<PriorityArray>> {
        let slots: Option<String> =
            sqlx::query_scalar("SELECT slots FROM priority_arrays WHERE point_uuid = ?")
                .bind(point_uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(slots
            .map(|s| serde_json::from_str::<PriorityArray>(&s))
            .transpose()?)
    }

    pub async fn save_priority_array(
        &self,
        point_uuid: &str,
        array: &PriorityArray,
    ) -> PointResult<()> {
        let result = sqlx::query("UPDATE priority_arrays SET slots = ? WHERE point_uuid = ?")
            .bind(serde_json::to_string(array)?)
            .bind(point_uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PointError::not_found(format!(
                "priority array of point {}",
                point_uuid
            )));
        }
        Ok(())
    }

    /// Write command from the value writer
    ///
    /// `priority_array_write` merges a partial array; otherwise `value` lands
    /// in `priority`, or in the fallback slot 16 when no priority is given.
    /// Non-writable points are rejected.
    pub async fn update_priority_value(
        &self,
        point_uuid: &str,
        value: Option<f64>,
        priority: Option<u8>,
        priority_array_write: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> PointResult<PriorityArray> {
        let point = self
            .get_point(point_uuid)
            .await?
            .ok_or_else(|| PointError::not_found(format!("point {}", point_uuid)))?;
        if !point.writable {
            return Err(PointError::validation("Point is not writable"));
        }

        let mut array = point
            .priority_array_write
            .unwrap_or_else(|| PriorityArray::fallback_only(point.fallback_value));
        match priority_array_write {
            Some(update) => array.merge(update)?,
            None => array.set_slot(priority.unwrap_or(FALLBACK_PRIORITY), value)?,
        }

        self.save_priority_array(point_uuid, &array).await?;
        Ok(array)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use crate::model::{Device, FunctionCode, Network, Point, PointStore};
    use crate::store::SqliteStore;
    use serde_json::json;

    async fn fixture(code: FunctionCode) -> (SqliteStore, Point) {
        let store = SqliteStore::in_memory().await.unwrap();
        let network = Network::tcp("tcp_1", "10.0.0.5", 502);
        store.create_network(&network).await.unwrap();
        let device = Device::new(&network.uuid, "meter", 1);
        store.create_device(&device).await.unwrap();
        let mut point = Point::new(&device.uuid, "p", code, 1, 1);
        store.create_point(&mut point).await.unwrap();
        (store, point)
    }

    fn reading(uuid: &str, value: f64) -> PointStore {
        PointStore::with_value(uuid, value, value, "[0]".to_string())
    }

    #[tokio::test]
    async fn test_cov_threshold_suppresses_small_changes() {
        let (store, point) = fixture(FunctionCode::ReadHoldingRegisters).await;

        let mut first = reading(&point.uuid, 10.0);
        assert!(store.update_point_store_value(&mut first, 0.5).await.unwrap());
        assert!(first.ts_value.is_some());

        let mut small = reading(&point.uuid, 10.3);
        assert!(!store.update_point_store_value(&mut small, 0.5).await.unwrap());
        assert!(small.ts_value.is_none());

        let mut large = reading(&point.uuid, 10.6);
        assert!(store.update_point_store_value(&mut large, 0.5).await.unwrap());

        let row = store.get_point_store(&point.uuid).await.unwrap().unwrap();
        assert_eq!(row.value, Some(10.6));
    }

    #[tokio::test]
    async fn test_same_value_not_persisted_with_zero_threshold() {
        let (store, point) = fixture(FunctionCode::ReadHoldingRegisters).await;
        let mut a = reading(&point.uuid, 4.0);
        assert!(store.update_point_store_value(&mut a, 0.0).await.unwrap());
        let mut b = reading(&point.uuid, 4.0);
        assert!(!store.update_point_store_value(&mut b, 0.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_transitions() {
        let (store, point) = fixture(FunctionCode::ReadHoldingRegisters).await;
        let mut ok = reading(&point.uuid, 1.0);
        store.update_point_store(&mut ok, 0.0).await.unwrap();

        let mut fault = PointStore::with_fault(&point.uuid, "illegal data address");
        assert!(store.update_point_store(&mut fault, 0.0).await.unwrap());
        assert!(fault.ts_fault.is_some());
        let mut same = PointStore::with_fault(&point.uuid, "illegal data address");
        assert!(!store.update_point_store(&mut same, 0.0).await.unwrap());
        let mut other = PointStore::with_fault(&point.uuid, "timeout");
        assert!(store.update_point_store(&mut other, 0.0).await.unwrap());

        // same value as before the fault still persists because the fault clears
        let mut recovered = reading(&point.uuid, 1.0);
        assert!(store.update_point_store(&mut recovered, 0.0).await.unwrap());
        let row = store.get_point_store(&point.uuid).await.unwrap().unwrap();
        assert!(!row.fault);
        assert_eq!(row.fault_message, None);
    }

    #[tokio::test]
    async fn test_value_writer() {
        let (store, point) = fixture(FunctionCode::WriteRegister).await;

        let array = store
            .update_priority_value(&point.uuid, Some(55.0), None, None)
            .await
            .unwrap();
        assert_eq!(array.highest_priority(), Some((16, 55.0)));

        let array = store
            .update_priority_value(&point.uuid, Some(7.0), Some(8), None)
            .await
            .unwrap();
        assert_eq!(array.highest_priority(), Some((8, 7.0)));

        let update = json!({"_8": null, "_1": 99.0});
        let array = store
            .update_priority_value(&point.uuid, None, None, update.as_object())
            .await
            .unwrap();
        assert_eq!(array.highest_priority(), Some((1, 99.0)));

        let saved = store.get_priority_array(&point.uuid).await.unwrap().unwrap();
        assert_eq!(saved, array);
    }

    #[tokio::test]
    async fn test_value_writer_rejects_read_only_point() {
        let (store, point) = fixture(FunctionCode::ReadHoldingRegisters).await;
        let err = store
            .update_priority_value(&point.uuid, Some(1.0), None, None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
