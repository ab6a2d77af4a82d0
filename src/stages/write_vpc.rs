//! Writes a virtual point-cloud manifest for the whole collection.

use super::{Stage, StageBase, WriterOutput};
use crate::{FileCollection, Result};
use serde_json::Value;
use std::any::Any;
use std::path::Path;

/// A collection-level stage: one manifest describing every retained file.
///
/// Runs once per run, before any chunk, and never pulls points.
#[derive(Clone, Debug, Default)]
pub struct WriteVpc {
    base: StageBase,
    out: WriterOutput,
    absolute_path: bool,
    use_gpstime: bool,
}

impl WriteVpc {
    /// Creates the stage.
    pub fn new() -> WriteVpc {
        WriteVpc::default()
    }
}

impl Stage for WriteVpc {
    fn name(&self) -> &'static str {
        "write_vpc"
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
        self.absolute_path = parameters
            .get("absolute_path")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.use_gpstime = parameters
            .get("use_gpstime")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(())
    }

    fn set_output_file(&mut self, path: &str) -> Result<()> {
        self.out.set_output_file(path);
        Ok(())
    }

    fn process_collection(&mut self, collection: &FileCollection) -> Result<()> {
        let Some(path) = self.out.current().map(Path::to_path_buf) else {
            return Ok(());
        };
        collection.write_vpc(&path, &self.base.crs, self.absolute_path, self.use_gpstime)
    }

    fn merge(&mut self, other: &dyn Stage) {
        if let Some(other) = other.as_any().downcast_ref::<WriteVpc>() {
            self.out.merge(&other.out);
        }
    }

    fn output(&self) -> Value {
        self.out.output()
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_streamable(&self) -> bool {
        true
    }
}
