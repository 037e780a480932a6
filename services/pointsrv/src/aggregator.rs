//! Register aggregation
//!
//! Points of one device are grouped per function code category, sorted by
//! register and cut into contiguous batches no larger than one Modbus
//! response.

use crate::model::{FunctionGroup, Point, PointStore};

/// Maximum registers (or bits) one aggregate exchange may span
pub const MAX_BATCH_SIZE: u32 = 253;

/// Split points into the six function code categories, in polling order
///
/// Empty categories are omitted. Point order inside a category is preserved.
pub fn group_points(points: Vec<Point>) -> Vec<(FunctionGroup, Vec<Point>)> {
    let mut groups: Vec<(FunctionGroup, Vec<Point>)> = FunctionGroup::ALL
        .iter()
        .map(|group| (*group, Vec::new()))
        .collect();

    for point in points {
        let group = point.function_code.group();
        if let Some((_, members)) = groups.iter_mut().find(|(g, _)| *g == group) {
            members.push(point);
        }
    }

    groups.retain(|(_, members)| !members.is_empty());
    groups
}

/// Whether a point needs an exchange this pass
///
/// Reads always do. Writes need an effective value, and `write_value_once`
/// points skip the write when the device already holds that value.
pub fn is_point_to_be_written(point: &Point, store: Option<&PointStore>) -> bool {
    if !point.function_code.is_writable() {
        return true;
    }
    let Some(write_value) = point.effective_write_value() else {
        return false;
    };
    if point.write_value_once {
        if let Some(store) = store {
            if !store.fault && store.value_original == Some(write_value) {
                return false;
            }
        }
    }
    true
}

/// A contiguous run of points served by one exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    points: Vec<Point>,
}

impl Batch {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    pub fn is_single(&self) -> bool {
        self.points.len() == 1
    }

    /// First register of the batch
    pub fn start(&self) -> u32 {
        self.points.first().map(|p| p.register).unwrap_or_default()
    }

    /// Registers (or bits) spanned by the batch
    pub fn quantity(&self) -> u32 {
        self.points.iter().map(|p| p.register_length).sum()
    }

    /// Portion of a batch response belonging to `point`
    pub fn slice_for<'a, T>(&self, point: &Point, response: &'a [T]) -> Option<&'a [T]> {
        let offset = point.register.checked_sub(self.start())? as usize;
        let end = offset + point.register_length as usize;
        response.get(offset..end)
    }
}

/// Cut one category into batches
///
/// Sorts by register. A batch closes when the next point is not adjacent, when
/// adding it would exceed [`MAX_BATCH_SIZE`], or at the end of the list. A
/// point longer than the limit forms a batch of its own.
pub fn plan_batches(mut points: Vec<Point>) -> Vec<Batch> {
    points.sort_by_key(|p| p.register);

    let mut batches = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    let mut size = 0u32;

    for point in points {
        if let Some(last) = current.last() {
            let adjacent = last.register + last.register_length == point.register;
            if !adjacent || size + point.register_length > MAX_BATCH_SIZE {
                batches.push(Batch {
                    points: std::mem::take(&mut current),
                });
                size = 0;
            }
        }
        size += point.register_length;
        current.push(point);
    }
    if !current.is_empty() {
        batches.push(Batch { points: current });
    }
    batches
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::model::{FunctionCode, PriorityArray};

    fn point(code: FunctionCode, register: u32, length: u32) -> Point {
        Point::new("dev", format!("p{register}"), code, register, length)
    }

    fn holding(register: u32, length: u32) -> Point {
        point(FunctionCode::ReadHoldingRegisters, register, length)
    }

    #[test]
    fn test_group_points_fixed_order() {
        let points = vec![
            point(FunctionCode::WriteRegisters, 1, 2),
            point(FunctionCode::ReadCoils, 1, 1),
            point(FunctionCode::WriteCoil, 3, 1),
            point(FunctionCode::ReadInputRegisters, 1, 1),
            point(FunctionCode::WriteRegister, 9, 1),
        ];
        let groups = group_points(points);
        let order: Vec<FunctionGroup> = groups.iter().map(|(g, _)| *g).collect();
        assert_eq!(
            order,
            vec![
                FunctionGroup::ReadCoils,
                FunctionGroup::ReadInputRegisters,
                FunctionGroup::WriteCoils,
                FunctionGroup::WriteRegisters,
            ]
        );
        assert_eq!(groups[3].1.len(), 2);
    }

    #[test]
    fn test_contiguous_points_share_a_batch() {
        let batches = plan_batches(vec![holding(5, 2), holding(1, 2), holding(3, 2), holding(10, 1)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start(), 1);
        assert_eq!(batches[0].quantity(), 6);
        assert!(batches[1].is_single());
        assert_eq!(batches[1].start(), 10);
    }

    #[test]
    fn test_batches_respect_size_limit() {
        let points: Vec<Point> = (0..200).map(|i| holding(1 + i * 2, 2)).collect();
        let batches = plan_batches(points);
        for batch in &batches {
            assert!(batch.quantity() <= MAX_BATCH_SIZE);
            for pair in batch.points().windows(2) {
                assert_eq!(pair[0].register + pair[0].register_length, pair[1].register);
            }
        }
        assert_eq!(batches.iter().map(|b| b.points().len()).sum::<usize>(), 200);
        assert_eq!(batches[0].quantity(), 252);
    }

    #[test]
    fn test_oversized_point_stands_alone() {
        let batches = plan_batches(vec![holding(1, 300), holding(301, 1)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].quantity(), 300);
    }

    #[test]
    fn test_slice_for() {
        let batch = plan_batches(vec![holding(1, 1), holding(2, 2), holding(4, 1)])
            .pop()
            .unwrap();
        let response = [10u16, 20, 21, 30];
        let middle = batch.points()[1].clone();
        assert_eq!(batch.slice_for(&middle, &response), Some(&response[1..3]));
        assert_eq!(batch.slice_for(&middle, &response[..2]), None);
    }

    #[test]
    fn test_write_filter() {
        let read = holding(1, 1);
        assert!(is_point_to_be_written(&read, None));

        let mut write = point(FunctionCode::WriteRegister, 1, 1);
        write.priority_array_write = Some(PriorityArray::default());
        assert!(!is_point_to_be_written(&write, None));

        write.priority_array_write = Some(PriorityArray::fallback_only(Some(5.0)));
        assert!(is_point_to_be_written(&write, None));

        write.write_value_once = true;
        let mut store = PointStore::with_value(&write.uuid, 5.0, 5.0, "[5]".to_string());
        assert!(!is_point_to_be_written(&write, Some(&store)));

        store.fault = true;
        assert!(is_point_to_be_written(&write, Some(&store)));

        store.fault = false;
        store.value_original = Some(4.0);
        assert!(is_point_to_be_written(&write, Some(&store)));
    }
}
