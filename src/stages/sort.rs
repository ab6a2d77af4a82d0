//! Spatially reorders a materialized point cloud.

use super::{Stage, StageBase};
use crate::{Error, GridPartition, PointCloud, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;

// Cell size of the spatial ordering, in meters.
const SORT_RESOLUTION: f64 = 50.0;

/// Reorders the points so that spatially close points sit close in memory.
///
/// Points are grouped by a coarse grid; visiting the cells in ascending
/// order yields the permutation applied with the cloud's cycle-following
/// sort. Compact cells keep the downstream grid index small and make
/// interval reads nearly sequential.
#[derive(Clone, Debug, Default)]
pub struct Sort {
    base: StageBase,
    spatial: bool,
}

impl Sort {
    /// Creates the stage; spatial ordering is on by default.
    pub fn new() -> Sort {
        Sort {
            base: StageBase::default(),
            spatial: true,
        }
    }
}

impl Stage for Sort {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        self.spatial = parameters
            .get("spatial")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        if !self.spatial || cloud.is_empty() {
            return Ok(());
        }

        let resolution = SORT_RESOLUTION * self.base.crs.linear_units();
        let bounds = &cloud.header().bounds;
        let mut grid = GridPartition::new(
            bounds.min.x,
            bounds.min.y,
            bounds.max.x,
            bounds.max.y,
            resolution,
        );
        while let Some(index) = cloud.read_point(true) {
            let point = cloud.view(index);
            grid.insert(point.x(), point.y());
        }

        // visit the cells in ascending order to build the permutation
        let sorted: BTreeMap<usize, _> = grid.groups().collect();
        let mut order = Vec::with_capacity(cloud.len());
        for intervals in sorted.values() {
            for interval in intervals.iter() {
                for index in interval.start..=interval.end {
                    order.push(index as usize);
                }
            }
        }
        if order.len() != cloud.len() {
            return Err(Error::Io(std::io::Error::other(
                "some points fell outside the sorting grid",
            )));
        }
        cloud.sort(&order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Point};

    #[test]
    fn groups_nearby_points() {
        let mut header = Header::default();
        header.number_of_points = 4;
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        // two far-apart locations, interleaved
        for &(x, y) in &[(0.0, 0.0), (500.0, 500.0), (1.0, 1.0), (501.0, 501.0)] {
            point.set_x(x);
            point.set_y(y);
            cloud.add_point(&point).unwrap();
        }
        cloud.update_header();

        let mut stage = Sort::new();
        let mut payload = Some(cloud);
        stage.process_cloud(&mut payload).unwrap();
        let cloud = payload.unwrap();

        let xs: Vec<f64> = (0..4).map(|i| cloud.view(i).x()).collect();
        // each location's pair is now contiguous
        assert!((xs[0] - xs[1]).abs() < 2.0);
        assert!((xs[2] - xs[3]).abs() < 2.0);
    }
}
