//! Short-circuits the pipeline for chunks matching a condition.

use super::{Stage, StageBase};
use crate::{Chunk, Error, Result};
use serde_json::Value;
use std::any::Any;

#[derive(Clone, Debug)]
enum StopCondition {
    OutsideBbox {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },
    ChunkIdBelow(usize),
}

/// Skips the rest of the pipeline for chunks outside a bounding box or
/// below a chunk id.
///
/// The state is decided at `set_chunk` time, so a skipped chunk costs
/// nothing: the engine queries `break_pipeline` before reading any point.
#[derive(Clone, Debug)]
pub struct StopIf {
    base: StageBase,
    condition: StopCondition,
    state: bool,
}

impl StopIf {
    /// Creates the stage; the condition arrives through `set_parameters`.
    pub fn new() -> StopIf {
        StopIf {
            base: StageBase::default(),
            condition: StopCondition::ChunkIdBelow(0),
            state: false,
        }
    }
}

impl Default for StopIf {
    fn default() -> StopIf {
        StopIf::new()
    }
}

impl Stage for StopIf {
    fn name(&self) -> &'static str {
        "stop_if"
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
        let condition = parameters
            .get("condition")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let number = |key: &str| parameters.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        self.condition = match condition {
            "outside_bbox" => StopCondition::OutsideBbox {
                xmin: number("xmin"),
                ymin: number("ymin"),
                xmax: number("xmax"),
                ymax: number("ymax"),
            },
            "chunk_id_below" => StopCondition::ChunkIdBelow(
                parameters.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
            ),
            other => {
                return Err(Error::InvalidFilter(format!(
                    "invalid condition in stop_if: '{other}'"
                )));
            }
        };
        Ok(())
    }

    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base.set_chunk(chunk);
        self.state = match &self.condition {
            StopCondition::OutsideBbox {
                xmin,
                ymin,
                xmax,
                ymax,
            } => {
                chunk.xmax < *xmin || *xmax < chunk.xmin || chunk.ymax < *ymin || *ymax < chunk.ymin
            }
            StopCondition::ChunkIdBelow(index) => chunk.id < *index,
        };
        Ok(())
    }

    fn break_pipeline(&self) -> bool {
        self.state
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_streamable(&self) -> bool {
        true
    }
}
