//! Writes points to pcd files, binary by default.

use super::{Stage, StageBase, WriterOutput};
use crate::io::pcd::PcdWriter;
use crate::{Header, Point, PointCloud, PointRef, Result};
use serde_json::Value;
use std::any::Any;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The terminal pcd writer; `*` templating and merged mode behave exactly
/// like the las writer.
#[derive(Clone, Debug)]
pub struct WritePcd {
    base: StageBase,
    out: WriterOutput,
    binary: bool,
    writer: Option<Arc<Mutex<PcdWriter>>>,
    merged_writer: Arc<Mutex<Option<PcdWriter>>>,
}

impl WritePcd {
    /// Creates the stage.
    pub fn new() -> WritePcd {
        WritePcd {
            base: StageBase::default(),
            out: WriterOutput::default(),
            binary: true,
            writer: None,
            merged_writer: Arc::new(Mutex::new(None)),
        }
    }

    fn accepts(&self, point: &PointRef) -> bool {
        !point.deleted() && !point.buffered() && !self.base.filter.reject(point)
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

impl Default for WritePcd {
    fn default() -> WritePcd {
        WritePcd::new()
    }
}

impl Stage for WritePcd {
    fn name(&self) -> &'static str {
        "write_pcd"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(WritePcd {
            base: self.base.clone(),
            out: self.out.worker_clone(),
            binary: self.binary,
            writer: None,
            merged_writer: Arc::clone(&self.merged_writer),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        self.binary = parameters
            .get("binary")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(())
    }

    fn set_output_file(&mut self, path: &str) -> Result<()> {
        if let Some(path) = self.out.set_output_file(path) {
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
                *guard = Some(PcdWriter::from_path(&path, &header.schema, self.binary)?);
            }
        } else {
            self.writer = Some(Arc::new(Mutex::new(PcdWriter::from_path(
                &path,
                &header.schema,
                self.binary,
            )?)));
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
        let mut owned = Point::new(cloud.schema());
        for index in selected {
            let data = cloud.view(index).data().to_vec();
            owned.copy_from(&data);
            self.write_one(&owned.as_ref())?;
        }
        Ok(())
    }

    fn write(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.lock().expect("the writer lock is sane").close()?;
        }
        Ok(())
    }

    fn clear(&mut self, last: bool) {
        self.writer = None;
        if last {
            let mut guard = self.merged_writer.lock().expect("the writer lock is sane");
            if let Some(mut writer) = guard.take() {
                if let Err(error) = writer.close() {
                    log::error!("could not finalize the merged pcd output: {error}");
                }
            }
        }
    }

    fn merge(&mut self, other: &dyn Stage) {
        if let Some(other) = other.as_any().downcast_ref::<WritePcd>() {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Schema;
    use tempfile::TempDir;

    #[test]
    fn merged_write() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("all.pcd");
        let mut stage = WritePcd::new();
        stage.set_output_file(path.to_str().unwrap()).unwrap();
        assert!(path.exists());

        let mut header = Header::default();
        header.schema = Schema::core();
        let mut h = Some(header);
        stage.process_header(&mut h).unwrap();

        let mut point = Point::new(&h.as_ref().unwrap().schema);
        for i in 0..3 {
            point.set_x(f64::from(i));
            let mut payload = Some(point.clone());
            stage.process_point(&mut payload).unwrap();
        }
        stage.clear(true);

        let header = crate::io::pcd::read_header(&path).unwrap();
        assert_eq!(3, header.number_of_points);
    }
}
