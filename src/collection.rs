//! The file collection and its chunk planner.

use crate::{
    Chunk, Crs, Error, Grid, Header, Progress, Rectangle, Result, Shape, Signature,
    VirtualPointCloud,
};
use log::warn;
use std::path::{Path, PathBuf};

/// What a path turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    /// A directory, expanded (non-recursively) to its regular files.
    Directory,
    /// A virtual point-cloud manifest.
    Vpc,
    /// A native las/laz file.
    Las,
    /// A spatial-index companion, silently skipped.
    Lax,
    /// A pcd file.
    Pcd,
    /// An existing file of an unsupported type.
    Other,
    /// A path that does not exist.
    Missing,
}

impl PathKind {
    /// Classifies a path by file-system stat and extension.
    pub fn of(path: &Path) -> PathKind {
        if !path.exists() {
            return PathKind::Missing;
        }
        if path.is_dir() {
            return PathKind::Directory;
        }
        match path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("vpc") => PathKind::Vpc,
            Some("las") | Some("laz") => PathKind::Las,
            Some("lax") => PathKind::Lax,
            Some("pcd") => PathKind::Pcd,
            _ => PathKind::Other,
        }
    }
}

/// A flat 2D index of file bounding boxes for overlap queries.
///
/// Collections are at most a few thousand files; a linear scan over packed
/// rectangles beats anything fancier at that size.
#[derive(Clone, Debug, Default)]
pub struct FileCollectionIndex {
    bboxes: Vec<Rectangle>,
}

impl FileCollectionIndex {
    /// Registers a bounding box.
    pub fn add(&mut self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) {
        self.bboxes.push(Rectangle::new(xmin, ymin, xmax, ymax));
    }

    /// Does any registered box overlap this rectangle?
    pub fn has_overlap(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> bool {
        self.bboxes.iter().any(|bbox| {
            xmin <= bbox.xmax && xmax >= bbox.xmin && ymin <= bbox.ymax && ymax >= bbox.ymin
        })
    }

    /// The indices of every registered box overlapping this rectangle.
    pub fn overlaps(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Vec<usize> {
        self.bboxes
            .iter()
            .enumerate()
            .filter(|(_, bbox)| {
                xmin <= bbox.xmax && xmax >= bbox.xmin && ymin <= bbox.ymax && ymax >= bbox.ymin
            })
            .map(|(index, _)| index)
            .collect()
    }
}

/// The set of input files, their headers, and the chunk plan.
///
/// Built from a heterogeneous list of inputs, the collection enforces a
/// single file format, retains one CRS, and enumerates the [Chunk]s a
/// pipeline processes: one per file by default, one per grid cell when a
/// chunk size is set, or one per registered query.
#[derive(Clone, Debug)]
pub struct FileCollection {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    crs: Crs,
    use_vpc: bool,
    buffer: f64,
    chunk_size: f64,
    headers: Vec<Header>,
    files: Vec<PathBuf>,
    noprocess: Vec<bool>,
    file_index: FileCollectionIndex,
    queries: Vec<Shape>,
}

impl Default for FileCollection {
    fn default() -> FileCollection {
        FileCollection {
            xmin: f64::MAX,
            ymin: f64::MAX,
            xmax: f64::MIN,
            ymax: f64::MIN,
            crs: Crs::default(),
            use_vpc: false,
            buffer: 0.0,
            chunk_size: 0.0,
            headers: Vec::new(),
            files: Vec::new(),
            noprocess: Vec::new(),
            file_index: FileCollectionIndex::default(),
            queries: Vec::new(),
        }
    }
}

impl FileCollection {
    /// Reads the headers of every input, expanding directories and virtual
    /// point-cloud manifests.
    ///
    /// Rules enforced here: the input list must not be empty or expand to
    /// nothing, a manifest must be the only input, every retained header
    /// must share one signature, and mixed CRSs keep the first one with a
    /// warning. Files with zero points are skipped with a warning.
    pub fn read(&mut self, inputs: &[String], progress: bool) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut bar = Progress::new(progress);
        bar.set_total(inputs.len() as u64);
        bar.set_prefix("Read files headers");

        for input in inputs {
            bar.inc(1);
            let path = PathBuf::from(input);
            match PathKind::of(&path) {
                PathKind::Las => self.add_file(&path, false)?,
                PathKind::Pcd => self.add_file(&path, false)?,
                PathKind::Vpc => {
                    if inputs.len() > 1 {
                        return Err(Error::VpcMixedWithOtherInputs);
                    }
                    self.read_vpc(&path)?;
                }
                PathKind::Lax => {}
                PathKind::Directory => {
                    let mut entries: Vec<PathBuf> = std::fs::read_dir(&path)?
                        .filter_map(|entry| entry.ok())
                        .map(|entry| entry.path())
                        .filter(|entry| entry.is_file())
                        .collect();
                    entries.sort();
                    for entry in entries {
                        match PathKind::of(&entry) {
                            PathKind::Las | PathKind::Pcd => self.add_file(&entry, false)?,
                            _ => {}
                        }
                    }
                }
                PathKind::Missing => return Err(Error::FileNotFound(path)),
                PathKind::Other => return Err(Error::UnknownFileType(path)),
            }
        }
        bar.done();

        if self.files.is_empty() {
            return Err(Error::EmptyInput);
        }

        let reference = self.headers[0].signature;
        if self.headers.iter().any(|header| header.signature != reference) {
            return Err(Error::MixedFormats);
        }

        let reference_crs = self.headers[0].crs.clone();
        if self.headers.iter().any(|header| header.crs != reference_crs) {
            warn!("mixed CRS found, the first one is retained");
        }
        self.crs = reference_crs;

        Ok(())
    }

    fn add_file(&mut self, path: &Path, noprocess: bool) -> Result<()> {
        let header = crate::io::open_header(path)?;
        if header.number_of_points == 0 {
            warn!("file {} containing 0 points was discarded", path.display());
            return Ok(());
        }
        self.push_header(header, noprocess);
        self.files.push(path.to_path_buf());
        Ok(())
    }

    fn read_vpc(&mut self, path: &Path) -> Result<()> {
        self.use_vpc = true;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let vpc = VirtualPointCloud::from_path(path)?;
        for (file, header) in vpc.entries(base)? {
            self.push_header(header, false);
            self.files.push(file);
        }
        Ok(())
    }

    /// Registers a header for an in-memory frame (no file on disk).
    pub fn add_frame(&mut self, header: Header) {
        self.push_header(header, false);
        self.files.push(PathBuf::from("frame"));
    }

    fn push_header(&mut self, header: Header, noprocess: bool) {
        let bounds = &header.bounds;
        self.xmin = self.xmin.min(bounds.min.x);
        self.ymin = self.ymin.min(bounds.min.y);
        self.xmax = self.xmax.max(bounds.max.x);
        self.ymax = self.ymax.max(bounds.max.y);
        self.file_index
            .add(bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y);
        self.noprocess.push(noprocess);
        self.headers.push(header);
    }

    /// Was this collection built from a virtual point-cloud manifest?
    pub fn is_source_vpc(&self) -> bool {
        self.use_vpc
    }

    /// Sets the buffer distance used by chunk planning.
    pub fn set_buffer(&mut self, buffer: f64) {
        self.buffer = buffer;
    }

    /// The buffer distance.
    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    /// Registers a rectangular query.
    pub fn add_query_rectangle(&mut self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) {
        self.queries.push(Shape::rectangle(xmin, ymin, xmax, ymax));
    }

    /// Registers a circular query.
    pub fn add_query_circle(&mut self, x: f64, y: f64, radius: f64) {
        self.queries.push(Shape::circle(x, y, radius));
    }

    /// Are any queries registered?
    pub fn has_queries(&self) -> bool {
        !self.queries.is_empty()
    }

    /// Marks files as buffer-only sources.
    pub fn set_noprocess(&mut self, noprocess: &[bool]) -> Result<()> {
        if noprocess.len() != self.files.len() {
            return Err(Error::MalformedVpc(
                "the noprocess mask is not the same size as the list of files".to_string(),
            ));
        }
        self.noprocess = noprocess.to_vec();
        Ok(())
    }

    /// Splits the coverage into square chunks of the given size.
    ///
    /// Each grid cell that overlaps at least one file becomes a rectangular
    /// query. Incompatible with explicit queries.
    pub fn set_chunk_size(&mut self, size: f64) -> Result<()> {
        self.chunk_size = 0.0;
        if size <= 0.0 {
            return Ok(());
        }
        if !self.queries.is_empty() {
            return Err(Error::ChunkSizeWithQueries);
        }
        self.chunk_size = size;

        let grid = Grid::new(self.xmin, self.ymin, self.xmax, self.ymax, size);
        let half = size / 2.0;
        for cell in 0..grid.ncells() {
            let x = grid.x_from_cell(cell);
            let y = grid.y_from_cell(cell);
            if self
                .file_index
                .has_overlap(x - half, y - half, x + half, y + half)
            {
                self.add_query_rectangle(x - half, y - half, x + half, y + half);
            }
        }
        Ok(())
    }

    /// The chunk size, zero when chunking follows files or queries.
    pub fn chunk_size(&self) -> f64 {
        self.chunk_size
    }

    /// The number of chunks the plan will produce.
    pub fn number_chunks(&self) -> usize {
        if self.queries.is_empty() {
            self.files.len()
        } else {
            self.queries.len()
        }
    }

    /// The number of input files.
    pub fn number_files(&self) -> usize {
        self.files.len()
    }

    /// How many files carry a spatial index?
    pub fn number_indexed_files(&self) -> usize {
        self.headers.iter().filter(|header| header.spatial_index).count()
    }

    /// Marks every file as spatially indexed, after an on-the-fly indexing
    /// pass.
    pub fn set_all_indexed(&mut self) {
        for header in &mut self.headers {
            header.spatial_index = true;
        }
    }

    /// False when the run would profit from indexing files first: multiple
    /// buffered files, or queries, with any file unindexed.
    pub fn check_spatial_index(&self) -> bool {
        let multi_files = self.number_files() > 1;
        let use_buffer = self.buffer > 0.0;
        let no_index = self.number_indexed_files() != self.number_files();
        let has_queries = !self.queries.is_empty();
        !((multi_files && use_buffer && no_index) || (has_queries && no_index))
    }

    /// The format of the collection, from the first header.
    pub fn signature(&self) -> Signature {
        self.headers[0].signature
    }

    /// The retained CRS.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Overrides the retained CRS.
    pub fn set_crs(&mut self, crs: Crs) {
        self.crs = crs;
    }

    /// The input files.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The parsed headers, parallel to [files](FileCollection::files).
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Is this path one of the input files?
    pub fn file_exists(&self, path: &Path) -> bool {
        self.files.iter().any(|file| file == path)
    }

    /// Left edge of the union bounding box.
    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    /// Bottom edge of the union bounding box.
    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    /// Right edge of the union bounding box.
    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    /// Top edge of the union bounding box.
    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    /// Produces the chunk at `index`.
    pub fn get_chunk(&self, index: usize) -> Result<Chunk> {
        if index >= self.number_chunks() {
            return Err(Error::Io(std::io::Error::other("chunk request out of bounds")));
        }
        let mut chunk = if self.queries.is_empty() {
            let mut chunk = self.chunk_regular(index);
            chunk.process = !self.noprocess[index];
            chunk
        } else {
            let mut chunk = self.chunk_with_query(index);
            chunk.process = true;
            chunk
        };
        chunk.id = index;
        Ok(chunk)
    }

    // One chunk per file, in input order.
    fn chunk_regular(&self, index: usize) -> Chunk {
        let header = &self.headers[index];
        let bounds = &header.bounds;
        let mut chunk = Chunk {
            xmin: bounds.min.x,
            ymin: bounds.min.y,
            xmax: bounds.max.x,
            ymax: bounds.max.y,
            buffer: self.buffer,
            name: stem_of(&self.files[index]),
            main_files: vec![self.files[index].clone()],
            ..Default::default()
        };

        // every other file overlapping the buffered footprint is a
        // neighbour
        let overlapping = self.file_index.overlaps(
            bounds.min.x - self.buffer,
            bounds.min.y - self.buffer,
            bounds.max.x + self.buffer,
            bounds.max.y + self.buffer,
        );
        for overlap in overlapping {
            if overlap != index {
                chunk.neighbour_files.push(self.files[overlap].clone());
            }
        }
        chunk
    }

    // One chunk per query.
    fn chunk_with_query(&self, index: usize) -> Chunk {
        let query = &self.queries[index];
        let (xmin, ymin, xmax, ymax) =
            (query.xmin(), query.ymin(), query.xmax(), query.ymax());
        let (centroid_x, centroid_y) = query.centroid();
        let epsilon = 1e-8;

        let mut chunk = Chunk::default();

        let overlapping = self.file_index.overlaps(
            xmin - self.buffer,
            ymin - self.buffer,
            xmax + self.buffer,
            ymax + self.buffer,
        );
        if overlapping.is_empty() {
            // a placeholder chunk that will not be read
            warn!("cannot find any file in [{xmin:.1}, {ymin:.1}, {xmax:.1}, {ymax:.1}]");
            chunk.process = true;
            return chunk;
        }

        chunk.xmin = xmin.max(self.xmin);
        chunk.ymin = ymin.max(self.ymin);
        chunk.xmax = xmax.min(self.xmax);
        chunk.ymax = ymax.min(self.ymax);
        chunk.buffer = self.buffer;
        chunk.shape = query.kind();

        if overlapping.len() == 1 {
            let file = &self.files[overlapping[0]];
            chunk.main_files.push(file.clone());
            chunk.name = format!("{}_{}", stem_of(file), index);
            self.fill_neighbours(&mut chunk, xmin, ymin, xmax, ymax);
            return chunk;
        }

        // several files intersect the query: all of them are main; the
        // name comes from the file holding the centroid when one does
        for &overlap in &overlapping {
            let file = &self.files[overlap];
            chunk.main_files.push(file.clone());
            if chunk.name.is_empty() {
                chunk.name = format!("{}_{}", stem_of(file), index);
            }
        }
        let at_centroid = self.file_index.overlaps(
            centroid_x - epsilon,
            centroid_y - epsilon,
            centroid_x + epsilon,
            centroid_y + epsilon,
        );
        if let Some(&owner) = at_centroid.first() {
            chunk.name = format!("{}_{}", stem_of(&self.files[owner]), index);
        }

        self.fill_neighbours(&mut chunk, xmin, ymin, xmax, ymax);
        chunk
    }

    fn fill_neighbours(&self, chunk: &mut Chunk, xmin: f64, ymin: f64, xmax: f64, ymax: f64) {
        if chunk.buffer <= 0.0 {
            return;
        }
        let overlapping = self.file_index.overlaps(
            xmin - self.buffer,
            ymin - self.buffer,
            xmax + self.buffer,
            ymax + self.buffer,
        );
        for overlap in overlapping {
            let file = &self.files[overlap];
            if !chunk.main_files.contains(file) {
                chunk.neighbour_files.push(file.clone());
            }
        }
    }

    /// Writes a virtual point-cloud manifest describing this collection.
    pub fn write_vpc(
        &self,
        path: &Path,
        crs: &Crs,
        absolute_path: bool,
        use_gpstime: bool,
    ) -> Result<()> {
        if self.signature() == Signature::Frame {
            return Err(Error::MalformedVpc(
                "cannot write a virtual point cloud for an in-memory frame".to_string(),
            ));
        }
        let vpc = VirtualPointCloud::build(
            path,
            &self.files,
            &self.headers,
            crs,
            absolute_path,
            use_gpstime,
        )?;
        vpc.write_to(path)
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
