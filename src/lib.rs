//! Tiled, pipelined processing engine for airborne and terrestrial
//! [LiDAR](https://en.wikipedia.org/wiki/Lidar) point clouds.
//!
//! A processing run is described as a pipeline of stages (read, filter,
//! sample, rasterize, write, …) executed over a collection of files. The
//! engine splits the coverage into spatial chunks, buffers each chunk against
//! its neighbouring tiles, and either streams points one by one through the
//! stages or materializes a whole chunk as an in-memory [PointCloud].
//!
//! # The file collection
//!
//! A [FileCollection] is built from a heterogeneous list of inputs: native
//! `.las`/`.laz` files, `.pcd` files, directories, or a `.vpc` virtual
//! point-cloud manifest. It reads every header (never the points), indexes the
//! bounding boxes, and enumerates processing [Chunk]s:
//!
//! ```no_run
//! use laspipe::FileCollection;
//!
//! let mut collection = FileCollection::default();
//! collection.read(&["tiles/".to_string()], false).unwrap();
//! collection.set_buffer(10.0);
//! for i in 0..collection.number_chunks() {
//!     let chunk = collection.get_chunk(i).unwrap();
//!     println!("{}: {} main, {} neighbours", chunk.name,
//!         chunk.main_files.len(), chunk.neighbour_files.len());
//! }
//! ```
//!
//! # The point cloud
//!
//! A [PointCloud] owns its points as a contiguous byte buffer laid out by a
//! user-extensible [Schema]. Every point starts with a flags byte (the low bit
//! is the soft-delete marker) followed by X, Y and Z stored as scaled
//! integers:
//!
//! ```
//! use laspipe::{Header, Point, PointCloud};
//!
//! let mut header = Header::default();
//! header.number_of_points = 1;
//! let mut cloud = PointCloud::new(header);
//! let mut point = Point::new(cloud.schema());
//! point.set_x(1.0);
//! point.set_y(2.0);
//! point.set_z(3.0);
//! cloud.add_point(&point).unwrap();
//! assert_eq!(1, cloud.len());
//! ```
//!
//! # The pipeline
//!
//! A [Pipeline] is parsed from a JSON array of stage descriptors. The first
//! descriptor builds the catalog, a `reader` descriptor must precede any
//! stage that needs points, and terminal writers finalize their outputs when
//! the run completes:
//!
//! ```no_run
//! use laspipe::{Pipeline, RunOptions};
//!
//! let descriptors = serde_json::json!([
//!     {"algoname": "build_catalog", "files": ["tiles/"], "buffer": 10.0},
//!     {"algoname": "reader"},
//!     {"algoname": "filter", "filter": "Classification == 2"},
//!     {"algoname": "write_las", "output": "ground/*.las"}
//! ]);
//! let (mut pipeline, collection) =
//!     Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
//! let outputs = pipeline.run(&collection).unwrap();
//! ```

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]

pub mod io;
pub mod stages;

mod bounds;
mod chunk;
mod cloud;
mod collection;
mod crs;
mod error;
mod filter;
mod grid;
mod header;
mod kdtree;
mod parser;
mod pipeline;
mod point;
mod progress;
mod raster;
mod schema;
mod shape;
mod transform;
mod vector;
mod vpc;

pub use bounds::Bounds;
pub use chunk::Chunk;
pub use cloud::PointCloud;
pub use collection::{FileCollection, FileCollectionIndex, PathKind};
pub use crs::Crs;
pub use error::Error;
pub use filter::{Condition, PointFilter};
pub use grid::{Grid, GridPartition, Interval};
pub use header::{Header, Signature};
pub use kdtree::{KdTree, Neighbor};
pub use pipeline::{Pipeline, RunOptions};
pub use point::{Accessor, Point, PointMut, PointRef};
pub use progress::Progress;
pub use raster::Raster;
pub use schema::{Attribute, AttributeType, Schema};
pub use shape::{Circle, Rectangle, Shape, ShapeKind};
pub use transform::Transform;
pub use vector::Vector;
pub use vpc::VirtualPointCloud;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;
