//! Overrides the CRS seen by downstream stages.

use super::{Stage, StageBase};
use crate::{Crs, Result};
use serde_json::Value;
use std::any::Any;

/// Replaces the propagated CRS with a configured one.
///
/// Inserted mid-pipeline, every stage after this one sees the new CRS. The
/// points themselves are untouched; this is a metadata assignment, not a
/// reprojection.
#[derive(Clone, Debug, Default)]
pub struct SetCrs {
    base: StageBase,
    crs: Crs,
}

impl SetCrs {
    /// Creates the stage.
    pub fn new() -> SetCrs {
        SetCrs::default()
    }
}

impl Stage for SetCrs {
    fn name(&self) -> &'static str {
        "set_crs"
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
        if let Some(epsg) = parameters.get("epsg").and_then(Value::as_u64) {
            self.crs = Crs::from_epsg(epsg as u32);
        }
        if let Some(wkt) = parameters.get("wkt").and_then(Value::as_str) {
            self.crs = Crs::from_wkt(wkt);
        }
        Ok(())
    }

    // the upstream CRS is received but deliberately not kept
    fn set_crs(&mut self, _crs: &Crs) {}

    fn crs(&self) -> Crs {
        self.crs.clone()
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_streamable(&self) -> bool {
        true
    }
}
