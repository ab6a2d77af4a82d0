//! The spatial work unit handed to each pipeline run.

use crate::ShapeKind;
use std::path::PathBuf;

/// One processing chunk: a bounding box, the files that carry its points,
/// and the neighbouring files needed to fill its buffer region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chunk {
    /// Position of this chunk in the enumeration, ascending from zero.
    pub id: usize,

    /// Display name, derived from the main file stem; empty when a query
    /// matched no file.
    pub name: String,

    /// Left edge of the core (unbuffered) extent.
    pub xmin: f64,
    /// Bottom edge of the core extent.
    pub ymin: f64,
    /// Right edge of the core extent.
    pub xmax: f64,
    /// Top edge of the core extent.
    pub ymax: f64,

    /// Buffer distance pulled from neighbouring tiles, in CRS-linear units.
    pub buffer: f64,

    /// The query shape this chunk came from, if any.
    pub shape: ShapeKind,

    /// Should this chunk be processed, or is it only a buffer source?
    pub process: bool,

    /// The files whose points belong to the chunk.
    pub main_files: Vec<PathBuf>,

    /// Files overlapping the buffered extent, excluding the main files.
    pub neighbour_files: Vec<PathBuf>,
}

impl Chunk {
    /// Does the chunk extent, expanded by its buffer, contain this location?
    pub fn contains_buffered(&self, x: f64, y: f64) -> bool {
        x >= self.xmin - self.buffer
            && x <= self.xmax + self.buffer
            && y >= self.ymin - self.buffer
            && y <= self.ymax + self.buffer
    }

    /// Does the core (unbuffered) extent contain this location?
    ///
    /// For circular chunks the core is the inscribed circle, matching the
    /// reader semantics of the query that produced the chunk.
    pub fn contains_core(&self, x: f64, y: f64) -> bool {
        if x < self.xmin || x > self.xmax || y < self.ymin || y > self.ymax {
            return false;
        }
        if self.shape == ShapeKind::Circle {
            let r = (self.xmax - self.xmin) / 2.0;
            let cx = (self.xmax + self.xmin) / 2.0;
            let cy = (self.ymax + self.ymin) / 2.0;
            let dx = cx - x;
            let dy = cy - y;
            return dx * dx + dy * dy <= r * r;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_containment() {
        let chunk = Chunk {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 10.0,
            ymax: 10.0,
            buffer: 2.0,
            ..Default::default()
        };
        assert!(chunk.contains_core(5.0, 5.0));
        assert!(!chunk.contains_core(11.0, 5.0));
        assert!(chunk.contains_buffered(11.0, 5.0));
        assert!(!chunk.contains_buffered(12.1, 5.0));
    }

    #[test]
    fn circular_core() {
        let chunk = Chunk {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 10.0,
            ymax: 10.0,
            shape: ShapeKind::Circle,
            ..Default::default()
        };
        assert!(chunk.contains_core(5.0, 5.0));
        assert!(!chunk.contains_core(0.5, 0.5));
    }
}
