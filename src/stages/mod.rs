//! The pipeline stages and their shared contract.
//!
//! A [Stage] is one node of a pipeline. The capability surface is wide but
//! every concrete stage implements a handful of methods; everything else
//! defaults to a successful no-op. Stages carry per-chunk mutable state and
//! are cloned per worker; the immutable run inputs (file collection, parsed
//! descriptors) are shared by reference.

mod attributes;
mod breakif;
mod filter;
mod focal;
mod info;
mod rasterize;
mod reader;
mod sampling;
mod set_crs;
mod sort;
mod summary;
mod write_index;
mod write_las;
mod write_pcd;
mod write_vpc;

pub use attributes::{AddAttribute, AddRgb, EditAttribute, RemoveAttribute};
pub use breakif::StopIf;
pub use filter::Filter;
pub use focal::Focal;
pub use info::Info;
pub use rasterize::Rasterize;
pub use reader::Reader;
pub use sampling::{SamplingPixel, SamplingVoxel};
pub use set_crs::SetCrs;
pub use sort::Sort;
pub use summary::Summary;
pub use write_index::WriteIndex;
pub use write_las::WriteLas;
pub use write_pcd::WritePcd;
pub use write_vpc::WriteVpc;

use crate::{
    Bounds, Chunk, Crs, Error, FileCollection, Header, Point, PointCloud, PointFilter, Progress,
    Raster, Result, ShapeKind,
};
use serde_json::Value;
use std::any::Any;
use std::path::{Path, PathBuf};

/// State common to every stage: identity, wiring, the current chunk, and
/// the stage filter.
#[derive(Clone, Debug)]
pub struct StageBase {
    /// Identifier used by `connect` references.
    pub uid: String,
    /// Threads available to an internally parallel stage.
    pub ncpu: usize,
    /// Chatty logging.
    pub verbose: bool,
    /// The CRS propagated from upstream.
    pub crs: Crs,
    /// The coverage extent known at parse time.
    pub extent: Bounds,
    /// Left edge of the current chunk.
    pub xmin: f64,
    /// Bottom edge of the current chunk.
    pub ymin: f64,
    /// Right edge of the current chunk.
    pub xmax: f64,
    /// Top edge of the current chunk.
    pub ymax: f64,
    /// Buffer distance of the current chunk.
    pub buffer: f64,
    /// Is the current chunk circular?
    pub circular: bool,
    /// The stage filter: true means reject.
    pub filter: PointFilter,
    /// The shared progress channel.
    pub progress: Progress,
}

impl Default for StageBase {
    fn default() -> StageBase {
        StageBase {
            uid: "xxx-xxx".to_string(),
            ncpu: 1,
            verbose: false,
            crs: Crs::default(),
            extent: Bounds::default(),
            xmin: 0.0,
            ymin: 0.0,
            xmax: 0.0,
            ymax: 0.0,
            buffer: 0.0,
            circular: false,
            filter: PointFilter::new(),
            progress: Progress::default(),
        }
    }
}

impl StageBase {
    /// Rebinds the chunk-dependent fields.
    pub fn set_chunk(&mut self, chunk: &Chunk) {
        self.xmin = chunk.xmin;
        self.ymin = chunk.ymin;
        self.xmax = chunk.xmax;
        self.ymax = chunk.ymax;
        self.buffer = chunk.buffer;
        self.circular = chunk.shape == ShapeKind::Circle;
    }

    /// Does the stage filter reject this point?
    pub fn rejects(&self, point: &crate::PointRef) -> bool {
        self.filter.reject(point)
    }
}

/// One unit of computation in a pipeline.
///
/// Concrete stages embed a [StageBase] and override the methods they care
/// about. The engine drives them in a fixed order: parse-time wiring
/// (`set_uid`, `set_ncpu`, `set_verbose`, `set_extent`, `connect`,
/// `set_parameters`, CRS propagation, `set_filter`, `set_output_file`), then
/// per chunk `set_chunk`, `set_input_file_name`, the `process_*` family,
/// `write`, and `clear`.
pub trait Stage: Send {
    /// The stage name as used in descriptors.
    fn name(&self) -> &'static str;

    /// The shared state block.
    fn base(&self) -> &StageBase;

    /// The shared state block, mutably.
    fn base_mut(&mut self) -> &mut StageBase;

    /// Deep copy for a worker thread.
    fn clone_stage(&self) -> Box<dyn Stage>;

    /// Dynamic self, used by `merge` implementations.
    fn as_any(&self) -> &dyn Any;

    /// Sets the uid this stage is addressed by.
    fn set_uid(&mut self, uid: &str) {
        self.base_mut().uid = uid.to_string();
    }

    /// The uid this stage is addressed by.
    fn uid(&self) -> String {
        self.base().uid.clone()
    }

    /// Sets the thread budget for internally parallel stages.
    fn set_ncpu(&mut self, ncpu: usize) {
        self.base_mut().ncpu = ncpu;
    }

    /// Toggles chatty logging.
    fn set_verbose(&mut self, verbose: bool) {
        self.base_mut().verbose = verbose;
    }

    /// Records the coverage extent known at parse time.
    fn set_extent(&mut self, extent: &Bounds) {
        self.base_mut().extent = *extent;
    }

    /// Hands the shared progress channel to the stage.
    fn set_progress(&mut self, progress: Progress) {
        self.base_mut().progress = progress;
    }

    /// Installs the stage filter.
    fn set_filter(&mut self, filter: PointFilter) {
        self.base_mut().filter = filter;
    }

    /// Receives the CRS propagated from upstream.
    fn set_crs(&mut self, crs: &Crs) {
        self.base_mut().crs = crs.clone();
    }

    /// The CRS this stage hands downstream.
    fn crs(&self) -> Crs {
        self.base().crs.clone()
    }

    /// Rebinds to a new chunk.
    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base_mut().set_chunk(chunk);
        Ok(())
    }

    /// Receives the current input stem, for `*`-templated writers.
    fn set_input_file_name(&mut self, _stem: &str) -> Result<()> {
        Ok(())
    }

    /// Receives the configured output path.
    fn set_output_file(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Receives the full descriptor, opaquely.
    fn set_parameters(&mut self, _parameters: &Value) -> Result<()> {
        Ok(())
    }

    /// Records a dependency on an earlier stage by pipeline index.
    ///
    /// `upstream` is the stage the index resolves to, so implementations
    /// check the target's type here, at parse time, not mid-run. The
    /// default rejects every connection: most stages have no use for one.
    fn connect(&mut self, _index: usize, upstream: &dyn Stage) -> Result<()> {
        Err(Error::InvalidConnection {
            uid: upstream.uid(),
            name: self.name().to_string(),
        })
    }

    /// The pipeline index this stage depends on, if any.
    fn connection(&self) -> Option<usize> {
        None
    }

    /// Processes without a payload, reading the connected stage's output.
    fn process_connected(&mut self, _upstream: &dyn Stage) -> Result<()> {
        Ok(())
    }

    /// Reacts to the per-chunk header; the reader populates it.
    fn process_header(&mut self, _header: &mut Option<Header>) -> Result<()> {
        Ok(())
    }

    /// Streaming point sink; the reader replaces `None` with the next point
    /// and signals the end of the stream by leaving `None` in place.
    fn process_point(&mut self, _point: &mut Option<Point>) -> Result<()> {
        Ok(())
    }

    /// Materialized whole-chunk processing; the reader populates the cloud.
    fn process_cloud(&mut self, _cloud: &mut Option<PointCloud>) -> Result<()> {
        Ok(())
    }

    /// Collection-level processing, run once per run before any chunk.
    fn process_collection(&mut self, _collection: &FileCollection) -> Result<()> {
        Ok(())
    }

    /// Queried after each stage executes; true short-circuits the rest of
    /// the pipeline for this chunk.
    fn break_pipeline(&self) -> bool {
        false
    }

    /// Finalizes this chunk's output.
    fn write(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases per-chunk state; with `last`, releases everything.
    fn clear(&mut self, _last: bool) {}

    /// Can this stage process points one at a time?
    fn is_streamable(&self) -> bool {
        false
    }

    /// Can chunks run concurrently through this stage?
    fn is_parallelizable(&self) -> bool {
        true
    }

    /// Does this stage spawn its own worker threads?
    fn is_parallelized(&self) -> bool {
        false
    }

    /// The buffer distance this stage needs around each chunk.
    fn need_buffer(&self) -> f64 {
        0.0
    }

    /// Does this stage consume point payloads?
    fn need_points(&self) -> bool {
        true
    }

    /// Does this stage produce a raster other stages can connect to?
    ///
    /// This is a type-level capability, true even before any chunk ran;
    /// [raster](Stage::raster) reflects the accumulated data.
    fn produces_raster(&self) -> bool {
        false
    }

    /// The raster this stage produces, for raster-to-raster connections.
    fn raster(&self) -> Option<&Raster> {
        None
    }

    /// Folds a worker clone's output into this stage.
    fn merge(&mut self, _other: &dyn Stage) {}

    /// Reorders per-chunk outputs; `order[i]` is the destination rank of
    /// the i-th produced output.
    fn sort(&mut self, _order: &[usize]) {}

    /// The stage's externally visible result.
    fn output(&self) -> Value {
        Value::Null
    }
}

impl Clone for Box<dyn Stage> {
    fn clone(&self) -> Box<dyn Stage> {
        self.clone_stage()
    }
}

impl std::fmt::Debug for Box<dyn Stage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stage({})", self.name())
    }
}

/// Output-path handling shared by writer stages.
///
/// A path containing `*` is a template: the `*` is replaced with the
/// current chunk's input stem, producing one file per chunk. A path without
/// `*` is *merged*: a single file spans all chunks.
#[derive(Clone, Debug, Default)]
pub struct WriterOutput {
    template: String,
    merged: bool,
    current: Option<PathBuf>,
    written: Vec<PathBuf>,
}

impl WriterOutput {
    /// Records the configured path. Returns the path to create eagerly when
    /// it is a merged (non-templated) output.
    pub fn set_output_file(&mut self, path: &str) -> Option<PathBuf> {
        if path.is_empty() {
            return None;
        }
        self.template = path.to_string();
        if path.contains('*') {
            return None;
        }
        self.merged = true;
        let path = PathBuf::from(path);
        self.current = Some(path.clone());
        self.written.push(path.clone());
        Some(path)
    }

    /// Substitutes the input stem into the template. Returns the per-chunk
    /// path to create, for non-merged outputs only.
    pub fn set_input_stem(&mut self, stem: &str) -> Option<PathBuf> {
        if self.template.is_empty() || self.merged {
            return None;
        }
        let path = PathBuf::from(self.template.replacen('*', stem, 1));
        self.current = Some(path.clone());
        self.written.push(path.clone());
        Some(path)
    }

    /// The output path for the current chunk.
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Is this a single merged output across all chunks?
    pub fn merged(&self) -> bool {
        self.merged
    }

    /// Is any output configured?
    pub fn is_configured(&self) -> bool {
        !self.template.is_empty()
    }

    /// The files written so far, in production order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// The copy handed to a worker: per-chunk writers start from an empty
    /// production list, merged writers share theirs.
    pub fn worker_clone(&self) -> WriterOutput {
        let mut clone = self.clone();
        if !clone.merged {
            clone.written.clear();
            clone.current = None;
        }
        clone
    }

    /// Folds a worker's production list into this one.
    pub fn merge(&mut self, other: &WriterOutput) {
        if self.merged {
            self.written = other.written.clone();
        } else {
            self.written.extend(other.written.iter().cloned());
        }
    }

    /// Reorders the production list so it matches chunk order.
    pub fn sort(&mut self, order: &[usize]) {
        if self.merged || self.written.is_empty() {
            return;
        }
        let mut ordered = vec![PathBuf::new(); self.written.len()];
        for (produced, &destination) in order.iter().enumerate() {
            ordered[destination] = self.written[produced].clone();
        }
        self.written = ordered;
    }

    /// The externally visible result: one path, a list, or nothing.
    pub fn output(&self) -> Value {
        match self.written.len() {
            0 => Value::Null,
            1 => Value::String(self.written[0].to_string_lossy().into_owned()),
            _ => Value::Array(
                self.written
                    .iter()
                    .map(|path| Value::String(path.to_string_lossy().into_owned()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templated_output() {
        let mut output = WriterOutput::default();
        assert!(output.set_output_file("out/*.las").is_none());
        assert!(!output.merged());
        assert_eq!(
            Some(PathBuf::from("out/tile_1.las")),
            output.set_input_stem("tile_1")
        );
        assert_eq!(Some(Path::new("out/tile_1.las")), output.current());
    }

    #[test]
    fn merged_output() {
        let mut output = WriterOutput::default();
        assert_eq!(
            Some(PathBuf::from("out/all.las")),
            output.set_output_file("out/all.las")
        );
        assert!(output.merged());
        // the stem substitution is a no-op in merged mode
        assert!(output.set_input_stem("tile_1").is_none());
        assert_eq!(Some(Path::new("out/all.las")), output.current());
    }

    #[test]
    fn sort_reorders_to_chunk_order() {
        let mut output = WriterOutput::default();
        output.set_output_file("*.las");
        output.set_input_stem("b");
        output.set_input_stem("a");
        // "b" was produced first but belongs at rank 1
        output.sort(&[1, 0]);
        assert_eq!(
            &[PathBuf::from("a.las"), PathBuf::from("b.las")],
            output.written()
        );
    }

    #[test]
    fn worker_clone_resets_per_chunk_writers() {
        let mut output = WriterOutput::default();
        output.set_output_file("*.las");
        output.set_input_stem("a");
        assert!(output.worker_clone().written().is_empty());

        let mut merged = WriterOutput::default();
        merged.set_output_file("all.las");
        assert_eq!(1, merged.worker_clone().written().len());
    }
}
