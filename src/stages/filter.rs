//! Soft-deletes the points rejected by the stage filter.

use super::{Stage, StageBase};
use crate::{Point, PointCloud, Result};
use std::any::Any;

/// Marks every point rejected by the stage's filter expressions as deleted.
///
/// Deletion is soft; downstream stages skip flagged points and a later
/// compaction reclaims the memory when enough of them pile up.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    base: StageBase,
}

impl Filter {
    /// Creates the stage; the predicates arrive through `set_filter`.
    pub fn new() -> Filter {
        Filter::default()
    }
}

impl Stage for Filter {
    fn name(&self) -> &'static str {
        "filter"
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

    fn process_point(&mut self, point: &mut Option<Point>) -> Result<()> {
        if let Some(point) = point {
            if self.base.rejects(&point.as_ref()) {
                point.set_deleted(true);
            }
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud else { return Ok(()) };
        let mut doomed = Vec::new();
        while let Some(index) = cloud.read_point(false) {
            if self.base.rejects(&cloud.view(index)) {
                doomed.push(index);
            }
        }
        for index in doomed {
            cloud.delete_point(index);
        }
        cloud.update_header();
        Ok(())
    }

    fn is_streamable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Header, PointFilter};

    #[test]
    fn deletes_rejected_points() {
        let mut header = Header::default();
        header.number_of_points = 10;
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        for i in 0..10 {
            point.set_z(f64::from(i));
            cloud.add_point(&point).unwrap();
        }
        cloud.update_header();

        let mut stage = Filter::new();
        stage.set_filter(PointFilter::from_expressions(&["z < 5".to_string()]).unwrap());
        let mut payload = Some(cloud);
        stage.process_cloud(&mut payload).unwrap();
        let cloud = payload.unwrap();
        assert_eq!(5, cloud.header().number_of_points);
        assert_eq!(10, cloud.len());
        assert_eq!(4.0, cloud.header().bounds.max.z);
    }

    #[test]
    fn streaming_marks_the_point() {
        let mut stage = Filter::new();
        stage.set_filter(PointFilter::from_expressions(&["z < 0".to_string()]).unwrap());
        let mut point = Some(Point::new(&crate::Schema::core()));
        stage.process_point(&mut point).unwrap();
        assert!(point.unwrap().deleted());
    }
}
