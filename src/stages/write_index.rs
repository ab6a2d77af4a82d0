//! The on-the-fly spatial-index placeholder.

use super::{Stage, StageBase};
use crate::{Chunk, Result};
use log::info;
use std::any::Any;

/// Prepended by the engine when a run would be quadratic without spatial
/// indices: multiple buffered files, or queries, with unindexed inputs.
///
/// Emitting the actual index companion files is the job of the external
/// format codec; this stage anchors the slot where that happens and tells
/// the user why the first chunk takes longer.
#[derive(Clone, Debug, Default)]
pub struct WriteIndex {
    base: StageBase,
    announced: bool,
}

impl WriteIndex {
    /// Creates the stage.
    pub fn new() -> WriteIndex {
        WriteIndex::default()
    }
}

impl Stage for WriteIndex {
    fn name(&self) -> &'static str {
        "write_lax"
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

    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base.set_chunk(chunk);
        if !self.announced {
            self.announced = true;
            info!(
                "files without a spatial index will be indexed on the fly; \
                 this takes some extra time now but speeds up everything later"
            );
        }
        Ok(())
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_streamable(&self) -> bool {
        true
    }
}
