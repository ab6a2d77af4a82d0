//! Bins points into a raster.

use super::{Stage, StageBase, WriterOutput};
use crate::{Chunk, Crs, PointCloud, Raster, Result};
use serde_json::Value;
use std::any::Any;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Max,
    Min,
    Count,
}

/// Reduces the points of each cell to a single value: the maximum z by
/// default, the minimum or a point count on request.
///
/// With a merged output one master raster spans the whole coverage and
/// every chunk writes into it; otherwise each chunk gets a fresh raster
/// over its core extent. Persisting rasters to a GIS format is the job of
/// an external library; the engine tracks the produced paths and keeps the
/// grids in memory for connected stages.
#[derive(Clone, Debug)]
pub struct Rasterize {
    base: StageBase,
    out: WriterOutput,
    resolution: f64,
    operation: Operation,
    raster: Option<Raster>,
}

impl Rasterize {
    /// Creates the stage with a 1-unit default resolution.
    pub fn new() -> Rasterize {
        Rasterize {
            base: StageBase::default(),
            out: WriterOutput::default(),
            resolution: 1.0,
            operation: Operation::Max,
            raster: None,
        }
    }
}

impl Default for Rasterize {
    fn default() -> Rasterize {
        Rasterize::new()
    }
}

impl Stage for Rasterize {
    fn name(&self) -> &'static str {
        "rasterize"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        let mut clone = self.clone();
        clone.out = self.out.worker_clone();
        Box::new(clone)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        if let Some(resolution) = parameters.get("res").and_then(Value::as_f64) {
            self.resolution = resolution;
        }
        self.operation = match parameters.get("operation").and_then(Value::as_str) {
            Some("min") => Operation::Min,
            Some("count") => Operation::Count,
            _ => Operation::Max,
        };
        Ok(())
    }

    fn set_output_file(&mut self, path: &str) -> Result<()> {
        self.out.set_output_file(path);
        Ok(())
    }

    fn set_input_file_name(&mut self, stem: &str) -> Result<()> {
        self.out.set_input_stem(stem);
        Ok(())
    }

    fn set_crs(&mut self, crs: &Crs) {
        self.base.crs = crs.clone();
        if let Some(raster) = &mut self.raster {
            raster.set_crs(crs.clone());
        }
    }

    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base.set_chunk(chunk);
        if self.out.merged() {
            // one master raster over the whole coverage
            if self.raster.is_none() {
                let extent = &self.base.extent;
                let mut raster = Raster::new(
                    extent.min.x,
                    extent.min.y,
                    extent.max.x,
                    extent.max.y,
                    self.resolution,
                );
                raster.set_crs(self.base.crs.clone());
                self.raster = Some(raster);
            }
        } else {
            let mut raster = Raster::new(
                chunk.xmin,
                chunk.ymin,
                chunk.xmax,
                chunk.ymax,
                self.resolution,
            );
            raster.set_crs(self.base.crs.clone());
            self.raster = Some(raster);
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        let Some(raster) = &mut self.raster else {
            return Ok(());
        };
        while let Some(index) = cloud.read_point(false) {
            let point = cloud.view(index);
            if self.base.filter.reject(&point) {
                continue;
            }
            let Some(cell) = raster.grid().cell_from_xy(point.x(), point.y()) else {
                continue;
            };
            match self.operation {
                Operation::Max => raster.update_max(cell, point.z() as f32),
                Operation::Min => raster.update_min(cell, point.z() as f32),
                Operation::Count => raster.update_add(cell, 1.0),
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn Stage) {
        let Some(other) = other.as_any().downcast_ref::<Rasterize>() else {
            return;
        };
        self.out.merge(&other.out);
        if self.out.merged() {
            if let (Some(mine), Some(theirs)) = (&mut self.raster, &other.raster) {
                mine.absorb(theirs);
            } else if self.raster.is_none() {
                self.raster = other.raster.clone();
            }
        }
    }

    fn sort(&mut self, order: &[usize]) {
        self.out.sort(order);
    }

    fn output(&self) -> Value {
        self.out.output()
    }

    fn produces_raster(&self) -> bool {
        true
    }

    fn raster(&self) -> Option<&Raster> {
        self.raster.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Point};

    fn cloud() -> PointCloud {
        let mut header = Header::default();
        header.number_of_points = 100;
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        for i in 0..10 {
            for j in 0..10 {
                point.set_x(f64::from(i) + 0.5);
                point.set_y(f64::from(j) + 0.5);
                point.set_z(f64::from(i + j));
                cloud.add_point(&point).unwrap();
            }
        }
        cloud.update_header();
        cloud
    }

    fn chunk() -> Chunk {
        Chunk {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 10.0,
            ymax: 10.0,
            process: true,
            ..Default::default()
        }
    }

    #[test]
    fn bins_max_z() {
        let mut stage = Rasterize::new();
        stage
            .set_parameters(&serde_json::json!({"res": 5.0, "operation": "max"}))
            .unwrap();
        stage.set_output_file("chm_*.tif").unwrap();
        stage.set_chunk(&chunk()).unwrap();
        let mut payload = Some(cloud());
        stage.process_cloud(&mut payload).unwrap();

        let raster = stage.raster().unwrap();
        assert_eq!(4, raster.ncells());
        // the top-right cell holds x in [5, 10), y in [5, 10): max z = 18
        let cell = raster.grid().cell_from_xy(7.5, 7.5).unwrap();
        assert_eq!(18.0, raster.value(cell));
    }

    #[test]
    fn counts_points() {
        let mut stage = Rasterize::new();
        stage
            .set_parameters(&serde_json::json!({"res": 10.0, "operation": "count"}))
            .unwrap();
        stage.set_chunk(&chunk()).unwrap();
        let mut payload = Some(cloud());
        stage.process_cloud(&mut payload).unwrap();
        assert_eq!(100.0, stage.raster().unwrap().value(0));
    }
}
