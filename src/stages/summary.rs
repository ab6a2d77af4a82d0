//! Accumulates collection-wide statistics over the points.

use super::{Stage, StageBase};
use crate::{Point, PointCloud, PointRef, Result};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::BTreeMap;

/// Counts points, tracks the z range, and tallies classification and
/// return-number histograms across every chunk.
///
/// The per-worker instances are folded together after a parallel run, so
/// the final numbers are independent of how chunks were scheduled. Buffered
/// points are not counted; they belong to a neighbouring chunk and would be
/// counted twice.
#[derive(Clone, Debug)]
pub struct Summary {
    base: StageBase,
    npoints: u64,
    zmin: f64,
    zmax: f64,
    classifications: BTreeMap<u8, u64>,
    returns: BTreeMap<u8, u64>,
}

impl Summary {
    /// Creates the stage.
    pub fn new() -> Summary {
        Summary {
            base: StageBase::default(),
            npoints: 0,
            zmin: f64::INFINITY,
            zmax: f64::NEG_INFINITY,
            classifications: BTreeMap::new(),
            returns: BTreeMap::new(),
        }
    }

    fn accumulate(&mut self, point: &PointRef) {
        if point.deleted() || point.buffered() {
            return;
        }
        if self.base.rejects(point) {
            return;
        }
        self.npoints += 1;
        let z = point.z();
        self.zmin = self.zmin.min(z);
        self.zmax = self.zmax.max(z);
        let classification = point.value("Classification").unwrap_or(0.0) as u8;
        *self.classifications.entry(classification).or_insert(0) += 1;
        let return_number = point.value("ReturnNumber").unwrap_or(0.0) as u8;
        *self.returns.entry(return_number).or_insert(0) += 1;
    }

    /// The number of accumulated points.
    pub fn npoints(&self) -> u64 {
        self.npoints
    }
}

impl Stage for Summary {
    fn name(&self) -> &'static str {
        "summarise"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        let mut clone = self.clone();
        // each worker accumulates from zero and is merged back
        clone.npoints = 0;
        clone.zmin = f64::INFINITY;
        clone.zmax = f64::NEG_INFINITY;
        clone.classifications.clear();
        clone.returns.clear();
        Box::new(clone)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn process_point(&mut self, point: &mut Option<Point>) -> Result<()> {
        if let Some(point) = point {
            self.accumulate(&point.as_ref());
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        while let Some(index) = cloud.read_point(false) {
            self.accumulate(&cloud.view(index));
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn Stage) {
        let Some(other) = other.as_any().downcast_ref::<Summary>() else {
            return;
        };
        self.npoints += other.npoints;
        self.zmin = self.zmin.min(other.zmin);
        self.zmax = self.zmax.max(other.zmax);
        for (&classification, &count) in &other.classifications {
            *self.classifications.entry(classification).or_insert(0) += count;
        }
        for (&return_number, &count) in &other.returns {
            *self.returns.entry(return_number).or_insert(0) += count;
        }
    }

    fn output(&self) -> Value {
        if self.npoints == 0 {
            return Value::Null;
        }
        json!({
            "npoints": self.npoints,
            "zmin": self.zmin,
            "zmax": self.zmax,
            "classifications": self.classifications,
            "returns": self.returns,
        })
    }

    fn is_streamable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, Schema};

    #[test]
    fn accumulates_and_merges() {
        let schema = Schema::core();
        let mut a = Summary::new();
        let mut b = Summary::new();
        let mut point = Point::new(&schema);
        for i in 0..10 {
            point.set_z(f64::from(i));
            let mut payload = Some(point.clone());
            if i < 6 {
                a.process_point(&mut payload).unwrap();
            } else {
                b.process_point(&mut payload).unwrap();
            }
        }
        a.merge(&b);
        assert_eq!(10, a.npoints());
        let output = a.output();
        assert_eq!(0.0, output["zmin"].as_f64().unwrap());
        assert_eq!(9.0, output["zmax"].as_f64().unwrap());
    }

    #[test]
    fn skips_buffered_points() {
        let mut header = Header::default();
        header.number_of_points = 2;
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        cloud.add_point(&point).unwrap();
        point.set_buffered(true);
        cloud.add_point(&point).unwrap();

        let mut summary = Summary::new();
        let mut payload = Some(cloud);
        summary.process_cloud(&mut payload).unwrap();
        assert_eq!(1, summary.npoints());
    }
}
