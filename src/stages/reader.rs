//! The reader stage: the head of every point-consuming pipeline.

use super::{Stage, StageBase};
use crate::io::{las::LasReader, pcd::PcdReader};
use crate::{
    Chunk, Header, Point, PointCloud, Result, Schema, Shape, Signature,
};
use log::debug;
use serde_json::Value;
use std::any::Any;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

// Keeps points sitting exactly on a chunk edge.
const EPSILON: f64 = 1e-8;

fn no_header() -> crate::Error {
    crate::Error::Io(std::io::Error::other(
        "the reader received a point request before the header pass",
    ))
}

#[derive(Debug)]
enum FileReader {
    Las(LasReader<BufReader<File>>),
    Pcd(PcdReader),
}

impl FileReader {
    fn open(path: &PathBuf, format: Signature) -> Result<FileReader> {
        match format {
            Signature::Pcdf => Ok(FileReader::Pcd(PcdReader::from_path(path)?)),
            _ => Ok(FileReader::Las(LasReader::from_path(path)?)),
        }
    }

    fn read_into(&mut self, point: &mut Point) -> Result<bool> {
        match self {
            FileReader::Las(reader) => reader.read_into(point),
            FileReader::Pcd(reader) => reader.read_into(point),
        }
    }
}

/// Reads the current chunk's files and produces its header and points.
///
/// In streaming mode points are handed downstream one at a time; in
/// materialized mode the whole chunk is loaded into a [PointCloud]. Points
/// outside the buffered chunk extent are dropped; points inside the buffer
/// ring but outside the core are flagged as buffered.
#[derive(Debug)]
pub struct Reader {
    base: StageBase,
    format: Signature,
    chunk: Chunk,
    queue: Vec<PathBuf>,
    cursor: usize,
    current: Option<FileReader>,
    header: Option<Header>,
    inside: Option<Shape>,
}

impl Reader {
    /// Creates a reader for the given source format.
    pub fn new(format: Signature) -> Reader {
        Reader {
            base: StageBase::default(),
            format,
            chunk: Chunk::default(),
            queue: Vec::new(),
            cursor: 0,
            current: None,
            header: None,
            inside: None,
        }
    }

    fn synthesize_header(&mut self) -> Result<Header> {
        let mut expected = 0;
        let mut schema: Option<Schema> = None;
        let mut template: Option<Header> = None;
        for path in &self.queue {
            let header = crate::io::open_header(path)?;
            expected += header.number_of_points;
            if schema.is_none() {
                schema = Some(header.schema.clone());
                template = Some(header);
            }
        }

        let mut header = template.unwrap_or_default();
        header.schema = schema.unwrap_or_else(Schema::core);
        header.number_of_points = expected;
        header.bounds.min.x = self.chunk.xmin;
        header.bounds.min.y = self.chunk.ymin;
        header.bounds.max.x = self.chunk.xmax;
        header.bounds.max.y = self.chunk.ymax;
        // the first reader attaches the propagated CRS to the header
        header.crs = self.base.crs.clone();
        Ok(header)
    }

    // Pulls the next accepted point into `point`; false when the chunk is
    // exhausted.
    fn next_point(&mut self, point: &mut Point) -> Result<bool> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.queue.get(self.cursor) else {
                    return Ok(false);
                };
                self.current = Some(FileReader::open(path, self.format)?);
            }

            let reader = self.current.as_mut().unwrap();
            if !reader.read_into(point)? {
                self.current = None;
                self.cursor += 1;
                continue;
            }

            let (x, y) = (point.x(), point.y());
            if let Some(inside) = &self.inside {
                if !inside.contains(x, y) {
                    continue;
                }
            }
            if self.base.rejects(&point.as_ref()) {
                continue;
            }
            point.set_buffered(!self.chunk.contains_core(x, y));
            return Ok(true);
        }
    }
}

impl Stage for Reader {
    fn name(&self) -> &'static str {
        "reader"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(Reader {
            base: self.base.clone(),
            format: self.format,
            chunk: self.chunk.clone(),
            queue: Vec::new(),
            cursor: 0,
            current: None,
            header: None,
            inside: None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base.set_chunk(chunk);
        self.chunk = chunk.clone();
        self.queue = chunk
            .main_files
            .iter()
            .chain(chunk.neighbour_files.iter())
            .cloned()
            .collect();
        self.cursor = 0;
        self.current = None;
        self.header = None;

        self.inside = Some(if self.base.circular {
            Shape::circle(
                (chunk.xmin + chunk.xmax) / 2.0,
                (chunk.ymin + chunk.ymax) / 2.0,
                (chunk.xmax - chunk.xmin) / 2.0 + chunk.buffer + EPSILON,
            )
        } else {
            Shape::rectangle(
                chunk.xmin - chunk.buffer - EPSILON,
                chunk.ymin - chunk.buffer - EPSILON,
                chunk.xmax + chunk.buffer + EPSILON,
                chunk.ymax + chunk.buffer + EPSILON,
            )
        });
        Ok(())
    }

    fn set_parameters(&mut self, _parameters: &Value) -> Result<()> {
        // queries carried by the reader descriptor are registered on the
        // collection by the parser
        Ok(())
    }

    fn process_header(&mut self, header: &mut Option<Header>) -> Result<()> {
        if header.is_some() {
            return Ok(());
        }
        if self.header.is_none() {
            self.header = Some(self.synthesize_header()?);
        }
        *header = self.header.clone();
        Ok(())
    }

    fn process_point(&mut self, point: &mut Option<Point>) -> Result<()> {
        let Some(header) = &self.header else {
            return Err(no_header());
        };
        let mut buffer = match point.take() {
            Some(point) => point,
            None => Point::new(&header.schema),
        };
        if self.next_point(&mut buffer)? {
            *point = Some(buffer);
        }
        Ok(())
    }

    fn process_cloud(&mut self, cloud: &mut Option<PointCloud>) -> Result<()> {
        let Some(header) = self.header.clone() else {
            return Err(no_header());
        };

        let mut progress = self.base.progress.clone();
        progress.reset();
        progress.set_total(header.number_of_points);
        progress.set_prefix("read");

        let mut output = PointCloud::new(header.clone());
        let mut point = Point::new(&header.schema);
        let mut read = 0_u64;
        while self.next_point(&mut point)? {
            if progress.interrupted() {
                return Err(crate::Error::Interrupted);
            }
            output.add_point(&point)?;
            read += 1;
            progress.update(read);
            progress.show();
        }
        output.update_header();
        output.build_index();
        progress.done();

        debug!("read {} points in chunk {}", output.len(), self.chunk.id);
        *cloud = Some(output);
        Ok(())
    }

    fn clear(&mut self, _last: bool) {
        self.current = None;
        self.queue.clear();
        self.header = None;
    }

    fn is_streamable(&self) -> bool {
        true
    }

    // the reader produces points, it does not consume them
    fn need_points(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::las::LasWriter;
    use crate::{Crs, ShapeKind, Transform, Vector};
    use tempfile::TempDir;

    fn write_tile(path: &std::path::Path, x0: f64, n: usize) {
        let mut header = Header::default();
        header.signature = Signature::Lasf;
        header.crs = Crs::from_epsg(32633);
        header.transforms = Vector::new(
            Transform { scale: 0.01, offset: 0.0 },
            Transform { scale: 0.01, offset: 0.0 },
            Transform { scale: 0.01, offset: 0.0 },
        );
        header.schema = Schema::core_scaled(0.01, 0.01, 0.01, 0.0, 0.0, 0.0);
        let mut writer = LasWriter::from_path(path, &header).unwrap();
        let mut point = Point::new(&header.schema);
        for i in 0..n {
            point.set_x(x0 + i as f64);
            point.set_y(i as f64);
            point.set_z(1.0);
            writer.write_point(&point.as_ref()).unwrap();
        }
        writer.close().unwrap();
    }

    fn chunk_for(path: &std::path::Path, xmin: f64, xmax: f64, buffer: f64) -> Chunk {
        Chunk {
            xmin,
            ymin: 0.0,
            xmax,
            ymax: 100.0,
            buffer,
            process: true,
            shape: ShapeKind::Unknown,
            main_files: vec![path.to_path_buf()],
            ..Default::default()
        }
    }

    #[test]
    fn streams_points_inside_the_chunk() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("tile.las");
        write_tile(&path, 0.0, 50);

        let mut reader = Reader::new(Signature::Lasf);
        reader.set_chunk(&chunk_for(&path, 0.0, 9.5, 0.0)).unwrap();
        let mut header = None;
        reader.process_header(&mut header).unwrap();
        assert_eq!(50, header.as_ref().unwrap().number_of_points);

        let mut count = 0;
        let mut point = None;
        loop {
            reader.process_point(&mut point).unwrap();
            let Some(p) = &point else { break };
            assert!(p.x() <= 9.5 + 1.0);
            assert!(!p.buffered());
            count += 1;
            point = None;
        }
        assert_eq!(10, count);
    }

    #[test]
    fn buffers_points_from_neighbour_files() {
        let directory = TempDir::new().unwrap();
        let left = directory.path().join("left.las");
        let right = directory.path().join("right.las");
        write_tile(&left, 0.0, 50);
        write_tile(&right, 50.0, 50);

        let mut chunk = chunk_for(&left, 0.0, 49.5, 5.0);
        chunk.neighbour_files = vec![right.clone()];

        let mut reader = Reader::new(Signature::Lasf);
        reader.set_chunk(&chunk).unwrap();
        let mut header = None;
        reader.process_header(&mut header).unwrap();
        let mut cloud = None;
        reader.process_cloud(&mut cloud).unwrap();
        let cloud = cloud.unwrap();

        // 50 core points plus the neighbours that fall in the buffer ring
        let buffered: Vec<usize> = (0..cloud.len())
            .filter(|&i| cloud.view(i).buffered())
            .collect();
        assert_eq!(55, cloud.len());
        assert_eq!(5, buffered.len());
        for index in buffered {
            assert!(cloud.view(index).x() > 49.5);
        }
    }

    #[test]
    fn reader_filter_drops_points() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("tile.las");
        write_tile(&path, 0.0, 50);

        let mut reader = Reader::new(Signature::Lasf);
        reader.set_filter(crate::PointFilter::from_expressions(&["x < 10".to_string()]).unwrap());
        reader.set_chunk(&chunk_for(&path, 0.0, 100.0, 0.0)).unwrap();
        let mut header = None;
        reader.process_header(&mut header).unwrap();
        let mut cloud = None;
        reader.process_cloud(&mut cloud).unwrap();
        assert_eq!(10, cloud.unwrap().len());
    }
}
