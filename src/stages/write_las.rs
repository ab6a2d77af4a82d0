//! Writes points to las files, one per chunk or one merged file.

use super::{Stage, StageBase, WriterOutput};
use crate::io::las::LasWriter;
use crate::{Header, Point, PointCloud, PointRef, Result};
use serde_json::Value;
use std::any::Any;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};

type FileWriter = LasWriter<BufWriter<File>>;

/// The terminal las writer.
///
/// A `*` in the output path produces one file per chunk, named after the
/// chunk; without it a single merged file spans all chunks, and workers
/// serialize their writes through a shared lock. Deleted points are never
/// written; buffered points are dropped unless `keep_buffer` is set.
#[derive(Clone, Debug)]
pub struct WriteLas {
    base: StageBase,
    out: WriterOutput,
    keep_buffer: bool,
    writer: Option<Arc<Mutex<FileWriter>>>,
    merged_writer: Arc<Mutex<Option<FileWriter>>>,
}

impl WriteLas {
    /// Creates the stage.
    pub fn new() -> WriteLas {
        WriteLas {
            base: StageBase::default(),
            out: WriterOutput::default(),
            keep_buffer: false,
            writer: None,
            merged_writer: Arc::new(Mutex::new(None)),
        }
    }

    fn accepts(&self, point: &PointRef) -> bool {
        if point.deleted() {
            return false;
        }
        if point.buffered() && !self.keep_buffer {
            return false;
        }
        !self.base.filter.reject(point)
    }

    fn write_one(&mut self, point: &PointRef) -> Result<()> {
        if self.out.merged() {
            let mut guard = self.merged_writer.lock().expect("the writer lock is sane");
            if let Some(writer) = guard.as_mut() {
                writer.write_point(point)?;
            }
        } else if let Some(writer) = &self.writer {
            writer
                .lock()
                .expect("the writer lock is sane")
                .write_point(point)?;
        }
        Ok(())
    }
}

impl Default for WriteLas {
    fn default() -> WriteLas {
        WriteLas::new()
    }
}

impl Stage for WriteLas {
    fn name(&self) -> &'static str {
        "write_las"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(WriteLas {
            base: self.base.clone(),
            out: self.out.worker_clone(),
            keep_buffer: self.keep_buffer,
            writer: None,
            // all clones funnel into the same merged sink
            merged_writer: Arc::clone(&self.merged_writer),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        self.keep_buffer = parameters
            .get("keep_buffer")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(())
    }

    fn set_output_file(&mut self, path: &str) -> Result<()> {
        if let Some(path) = self.out.set_output_file(path) {
            // the merged sink exists on disk from parse time
            File::create(&path)?;
        }
        Ok(())
    }

    fn set_input_file_name(&mut self, stem: &str) -> Result<()> {
        self.out.set_input_stem(stem);
        Ok(())
    }

    fn process_header(&mut self, header: &mut Option<Header>) -> Result<()> {
        let Some(header) = header else { return Ok(()) };
        let Some(path) = self.out.current().map(Path::to_path_buf) else {
            return Ok(());
        };

        if self.out.merged() {
            let mut guard = self.merged_writer.lock().expect("the writer lock is sane");
            if guard.is_none() {
                *guard = Some(LasWriter::from_path(&path, header)?);
            }
        } else {
            self.writer = Some(Arc::new(Mutex::new(LasWriter::from_path(&path, header)?)));
        }
        Ok(())
    }

    fn process_point(&mut self, point: &mut Option<Point>) -> Result<()> {
        let Some(point) = point else { return Ok(()) };
        if self.accepts(&point.as_ref()) {
            let point = point.clone();
            self.write_one(&point.as_ref())?;
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(cloud) = cloud.as_mut() else {
            return Ok(());
        };
        let mut selected = Vec::new();
        while let Some(index) = cloud.read_point(false) {
            if self.accepts(&cloud.view(index)) {
                selected.push(index);
            }
        }
        for index in selected {
            let point = cloud.view(index);
            let data = point.data().to_vec();
            let mut owned = Point::new(cloud.schema());
            owned.copy_from(&data);
            self.write_one(&owned.as_ref())?;
        }
        Ok(())
    }

    fn write(&mut self) -> Result<()> {
        // a per-chunk file is complete once its chunk ends
        if let Some(writer) = self.writer.take() {
            writer
                .lock()
                .expect("the writer lock is sane")
                .close()?;
        }
        Ok(())
    }

    fn clear(&mut self, last: bool) {
        self.writer = None;
        if last {
            let mut guard = self.merged_writer.lock().expect("the writer lock is sane");
            if let Some(mut writer) = guard.take() {
                if let Err(error) = writer.close() {
                    log::error!("could not finalize the merged las output: {error}");
                }
            }
        }
    }

    fn merge(&mut self, other: &dyn Stage) {
        if let Some(other) = other.as_any().downcast_ref::<WriteLas>() {
            self.out.merge(&other.out);
        }
    }

    fn sort(&mut self, order: &[usize]) {
        self.out.sort(order);
    }

    fn output(&self) -> Value {
        self.out.output()
    }

    fn is_streamable(&self) -> bool {
        true
    }

    fn is_parallelizable(&self) -> bool {
        // distinct per-chunk files may be written concurrently; the merged
        // sink serializes through its lock
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, Schema, Signature};
    use tempfile::TempDir;

    fn header() -> Header {
        let mut header = Header::default();
        header.signature = Signature::Lasf;
        header.schema = Schema::core();
        header.number_of_points = 3;
        header
    }

    #[test]
    fn templated_write() {
        let directory = TempDir::new().unwrap();
        let template = directory.path().join("*.las");
        let mut stage = WriteLas::new();
        stage
            .set_output_file(template.to_str().unwrap())
            .unwrap();
        stage.set_chunk(&Chunk::default()).unwrap();
        stage.set_input_file_name("tile_0").unwrap();

        let mut h = Some(header());
        stage.process_header(&mut h).unwrap();
        let mut point = Point::new(&h.as_ref().unwrap().schema);
        point.set_x(1.0);
        let mut payload = Some(point);
        stage.process_point(&mut payload).unwrap();
        stage.write().unwrap();
        stage.clear(true);

        let written = directory.path().join("tile_0.las");
        assert!(written.exists());
        let header = crate::io::las::read_header(&written).unwrap();
        assert_eq!(1, header.number_of_points);
        assert_eq!(Value::String(written.to_string_lossy().into_owned()), stage.output());
    }

    #[test]
    fn deleted_and_buffered_points_are_dropped() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("out.las");
        let mut stage = WriteLas::new();
        stage.set_output_file(path.to_str().unwrap()).unwrap();

        let mut h = Some(header());
        stage.process_header(&mut h).unwrap();
        let schema = h.as_ref().unwrap().schema.clone();

        let mut point = Point::new(&schema);
        let mut payload = Some(point.clone());
        stage.process_point(&mut payload).unwrap();
        point.set_deleted(true);
        payload = Some(point.clone());
        stage.process_point(&mut payload).unwrap();
        point.set_deleted(false);
        point.set_buffered(true);
        payload = Some(point);
        stage.process_point(&mut payload).unwrap();
        stage.clear(true);

        let header = crate::io::las::read_header(&path).unwrap();
        assert_eq!(1, header.number_of_points);
    }
}
