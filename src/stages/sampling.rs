//! Occupancy-based decimation: keep one point per voxel or per pixel.

use super::{Stage, StageBase};
use crate::{PointCloud, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;

fn sample<K: std::hash::Hash + Eq>(
    cloud: &mut PointCloud,
    mut key: impl FnMut(&crate::PointRef) -> K,
) {
    let mut occupied = HashSet::new();
    let mut doomed = Vec::new();
    while let Some(index) = cloud.read_point(false) {
        let point = cloud.view(index);
        if !occupied.insert(key(&point)) {
            doomed.push(index);
        }
    }
    for index in doomed {
        cloud.delete_point(index);
    }
    cloud.update_header();
}

/// Keeps the first point of each occupied voxel, soft-deleting the rest.
#[derive(Clone, Debug)]
pub struct SamplingVoxel {
    base: StageBase,
    resolution: f64,
}

impl SamplingVoxel {
    /// Creates the stage with a default 1-unit voxel.
    pub fn new() -> SamplingVoxel {
        SamplingVoxel {
            base: StageBase::default(),
            resolution: 1.0,
        }
    }
}

impl Default for SamplingVoxel {
    fn default() -> SamplingVoxel {
        SamplingVoxel::new()
    }
}

impl Stage for SamplingVoxel {
    fn name(&self) -> &'static str {
        "sampling_voxel"
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
        if let Some(resolution) = parameters.get("res").and_then(Value::as_f64) {
            self.resolution = resolution;
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        let resolution = self.resolution;
        sample(cloud, |point| {
            (
                (point.x() / resolution).floor() as i64,
                (point.y() / resolution).floor() as i64,
                (point.z() / resolution).floor() as i64,
            )
        });
        Ok(())
    }
}

/// Keeps the first point of each occupied pixel, soft-deleting the rest.
#[derive(Clone, Debug)]
pub struct SamplingPixel {
    base: StageBase,
    resolution: f64,
}

impl SamplingPixel {
    /// Creates the stage with a default 1-unit pixel.
    pub fn new() -> SamplingPixel {
        SamplingPixel {
            base: StageBase::default(),
            resolution: 1.0,
        }
    }
}

impl Default for SamplingPixel {
    fn default() -> SamplingPixel {
        SamplingPixel::new()
    }
}

impl Stage for SamplingPixel {
    fn name(&self) -> &'static str {
        "sampling_pixel"
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
        if let Some(resolution) = parameters.get("res").and_then(Value::as_f64) {
            self.resolution = resolution;
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        let resolution = self.resolution;
        sample(cloud, |point| {
            (
                (point.x() / resolution).floor() as i64,
                (point.y() / resolution).floor() as i64,
            )
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Point};

    fn cloud() -> PointCloud {
        let mut header = Header::default();
        header.number_of_points = 8;
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        // two clusters of four points each, 0.2 units wide
        for cluster in 0..2 {
            for i in 0..4 {
                point.set_x(f64::from(cluster) * 10.0 + f64::from(i) * 0.05);
                point.set_y(0.0);
                point.set_z(f64::from(i) * 0.05);
                cloud.add_point(&point).unwrap();
            }
        }
        cloud.update_header();
        cloud
    }

    #[test]
    fn voxel_sampling_keeps_one_per_voxel() {
        let mut stage = SamplingVoxel::new();
        stage.set_parameters(&serde_json::json!({"res": 1.0})).unwrap();
        let mut payload = Some(cloud());
        stage.process_cloud(&mut payload).unwrap();
        assert_eq!(2, payload.unwrap().header().number_of_points);
    }

    #[test]
    fn pixel_sampling_ignores_z() {
        let mut stage = SamplingPixel::new();
        stage.set_parameters(&serde_json::json!({"res": 0.1})).unwrap();
        let mut payload = Some(cloud());
        stage.process_cloud(&mut payload).unwrap();
        // 0.05 spacing at 0.1 resolution: two points share each pixel
        assert_eq!(4, payload.unwrap().header().number_of_points);
    }
}
