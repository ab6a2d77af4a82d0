//! The in-memory point store.

use crate::{
    Attribute, Error, GridPartition, Header, Interval, KdTree, Point, PointFilter, PointMut,
    PointRef, Raster, Result, Schema, Shape, Signature,
};

// Growth starts from this many points when the header gives no estimate.
const INITIAL_CAPACITY: usize = 100_000;

// Above this live/total ratio, compaction is not worth the copy.
const COMPACTION_RATIO: f64 = 0.75;

#[derive(Clone, Debug, Default)]
struct Cursor {
    started: bool,
    current_interval: usize,
    next_point: usize,
    intervals: Vec<Interval>,
    inside: bool,
    shape: Option<Shape>,
}

/// An owning, in-memory point cloud under one schema.
///
/// Points live in a single byte buffer laid out by the header's
/// [Schema]. Deletion is soft (a flag bit) until
/// [delete_deleted](PointCloud::delete_deleted) compacts the buffer. A 2D
/// grid index and a 3D kd-tree serve the spatial queries; both are rebuilt
/// after any bulk mutation.
///
/// # Examples
///
/// ```
/// use laspipe::{Header, Point, PointCloud};
///
/// let mut header = Header::default();
/// header.number_of_points = 3;
/// let mut cloud = PointCloud::new(header);
/// let mut point = Point::new(cloud.schema());
/// for i in 0..3 {
///     point.set_x(f64::from(i));
///     cloud.add_point(&point).unwrap();
/// }
/// cloud.update_header();
/// assert_eq!(3, cloud.header().number_of_points);
/// assert_eq!(2.0, cloud.header().bounds.max.x);
/// ```
#[derive(Clone, Debug)]
pub struct PointCloud {
    header: Header,
    data: Vec<u8>,
    npoints: usize,
    index: Option<GridPartition>,
    kdtree: Option<KdTree>,
    cursor: Cursor,
}

impl PointCloud {
    /// Creates an empty cloud described by a header.
    ///
    /// The header's point count, when set, caps the buffer growth so small
    /// files never over-allocate.
    pub fn new(header: Header) -> PointCloud {
        PointCloud {
            header,
            data: Vec::new(),
            npoints: 0,
            index: None,
            kdtree: None,
            cursor: Cursor::default(),
        }
    }

    /// Converts a raster into a cloud: every non-nodata cell becomes one
    /// point with z set to the cell value.
    pub fn from_raster(raster: &Raster) -> Result<PointCloud> {
        let grid = raster.grid();
        let mut header = Header::default();
        header.signature = Signature::Frame;
        header.schema = Schema::core_scaled(
            0.001,
            0.001,
            0.001,
            grid.xmin().floor(),
            grid.ymin().floor(),
            0.0,
        );
        header.number_of_points = grid.ncells() as u64;
        header.crs = raster.crs().clone();

        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        for cell in 0..grid.ncells() {
            let value = raster.value(cell);
            if raster.is_nodata(value) {
                continue;
            }
            point.zero();
            point.set_x(grid.x_from_cell(cell));
            point.set_y(grid.y_from_cell(cell));
            point.set_z(f64::from(value));
            cloud.add_point(&point)?;
        }
        cloud.update_header();
        cloud.build_index();
        Ok(cloud)
    }

    /// The cloud header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The cloud header, mutably.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// The per-point schema.
    pub fn schema(&self) -> &Schema {
        &self.header.schema
    }

    /// The number of stored records, soft-deleted points included.
    pub fn len(&self) -> usize {
        self.npoints
    }

    /// Is the cloud empty?
    pub fn is_empty(&self) -> bool {
        self.npoints == 0
    }

    /// The size of one record in bytes.
    pub fn point_size(&self) -> usize {
        self.header.schema.total_point_size()
    }

    /// A read-only view of the record at `index`.
    pub fn view(&self, index: usize) -> PointRef<'_> {
        let size = self.point_size();
        PointRef::new(&self.data[index * size..(index + 1) * size], &self.header.schema)
    }

    /// A mutable view of the record at `index`.
    pub fn view_mut(&mut self, index: usize) -> PointMut<'_> {
        let size = self.header.schema.total_point_size();
        PointMut::new(
            &mut self.data[index * size..(index + 1) * size],
            &self.header.schema,
        )
    }

    /// Appends a point record.
    ///
    /// The buffer starts at a 100,000-point capacity and doubles on demand,
    /// capped by the header's expected point count when that is known.
    pub fn add_point(&mut self, point: &Point) -> Result<()> {
        let size = self.point_size();
        debug_assert_eq!(size, point.data().len());

        if self.data.capacity() == 0 {
            self.data.reserve_exact(INITIAL_CAPACITY * size);
        }

        let required = self.data.len();
        if required + size > self.data.capacity() {
            let capacity = self.data.capacity();
            let mut target = (self.header.number_of_points as usize) * size;
            if target <= required {
                target = capacity * 2;
            }
            target = target.min(capacity * 2).max(required + size);
            self.data.reserve_exact(target - required);
        }

        self.data.extend_from_slice(point.data());
        self.npoints += 1;
        Ok(())
    }

    /// Sets the read cursor to start at `position`.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position >= self.npoints {
            return Err(Error::Io(std::io::Error::other("seek out of bounds")));
        }
        self.reset_cursor();
        self.cursor.inside = true;
        self.cursor.intervals = vec![Interval::new(position as u32, self.npoints as u32 - 1)];
        Ok(())
    }

    /// Restricts the read cursor to the points inside a shape.
    pub fn set_inside(&mut self, shape: Shape) {
        self.reset_cursor();
        self.cursor.inside = true;
        self.cursor.shape = Some(shape);
    }

    /// Restricts the read cursor to explicit intervals.
    pub fn set_intervals(&mut self, intervals: Vec<Interval>) {
        self.reset_cursor();
        self.cursor.inside = true;
        self.cursor.intervals = intervals;
    }

    /// Reads the next point, returning its index.
    ///
    /// Iterates the configured intervals in ascending order, skipping
    /// soft-deleted points unless `include_deleted` and filtering by the
    /// inside shape when one is set. Returning `None` resets the cursor for
    /// the next pass.
    pub fn read_point(&mut self, include_deleted: bool) -> Option<usize> {
        if self.npoints == 0 {
            return None;
        }

        if !self.cursor.started {
            self.cursor.current_interval = 0;
            if !self.cursor.inside {
                self.cursor.intervals = vec![Interval::new(0, self.npoints as u32 - 1)];
            } else if let Some(shape) = self.cursor.shape {
                let mut intervals = Vec::new();
                match &self.index {
                    Some(index) => index.query(
                        shape.xmin(),
                        shape.ymin(),
                        shape.xmax(),
                        shape.ymax(),
                        &mut intervals,
                    ),
                    None => intervals.push(Interval::new(0, self.npoints as u32 - 1)),
                }
                Interval::merge(&mut intervals);
                self.cursor.intervals = intervals;
            }
            if self.cursor.intervals.is_empty() {
                self.reset_cursor();
                return None;
            }
            self.cursor.next_point = self.cursor.intervals[0].start as usize;
            self.cursor.started = true;
        }

        loop {
            if self.cursor.current_interval >= self.cursor.intervals.len() {
                self.reset_cursor();
                return None;
            }

            let current = self.cursor.next_point;
            self.cursor.next_point += 1;
            if self.cursor.next_point
                > self.cursor.intervals[self.cursor.current_interval].end as usize
            {
                self.cursor.current_interval += 1;
                if self.cursor.current_interval < self.cursor.intervals.len() {
                    self.cursor.next_point =
                        self.cursor.intervals[self.cursor.current_interval].start as usize;
                }
            }

            let point = self.view(current);
            if let Some(shape) = &self.cursor.shape {
                if !shape.contains(point.x(), point.y()) {
                    continue;
                }
            }
            if include_deleted || !point.deleted() {
                return Some(current);
            }
        }
    }

    /// Soft-deletes the point at `index`.
    ///
    /// The record stays in the buffer; the header's live count shrinks.
    pub fn delete_point(&mut self, index: usize) {
        if self.view(index).deleted() {
            return;
        }
        self.view_mut(index).set_deleted(true);
        self.header.number_of_points -= 1;
    }

    /// Compacts the buffer when enough points are soft-deleted.
    ///
    /// When more than 25% of the records are deleted, live records are moved
    /// to the front in order, the buffer shrinks, and the spatial indices
    /// are rebuilt. Returns whether a compaction happened.
    pub fn delete_deleted(&mut self) -> bool {
        if self.npoints == 0 {
            return false;
        }
        let ratio = self.header.number_of_points as f64 / self.npoints as f64;
        if ratio > COMPACTION_RATIO {
            return false;
        }

        let size = self.point_size();
        let mut writer = 0;
        for i in 0..self.npoints {
            if self.view(i).deleted() {
                continue;
            }
            if i != writer {
                self.data.copy_within(i * size..(i + 1) * size, writer * size);
            }
            writer += 1;
        }
        self.npoints = writer;
        self.data.truncate(writer * size);
        self.data.shrink_to_fit();
        self.rebuild_index();
        true
    }

    /// Applies a permutation in place with the cycle-following algorithm.
    ///
    /// `order[destination]` is the index of the record that ends up at
    /// `destination`. Spatial indices are rebuilt afterwards.
    pub fn sort(&mut self, order: &[usize]) -> Result<()> {
        if order.len() != self.npoints {
            return Err(Error::Io(std::io::Error::other(
                "permutation length does not match the number of points",
            )));
        }

        let size = self.point_size();
        let mut visited = vec![false; self.npoints];
        let mut temp = vec![0_u8; size];

        for i in 0..self.npoints {
            if visited[i] || order[i] == i {
                visited[i] = true;
                continue;
            }
            temp.copy_from_slice(&self.data[i * size..(i + 1) * size]);
            let mut current = i;
            while !visited[current] {
                visited[current] = true;
                let next = order[current];
                if next != i {
                    self.data.copy_within(next * size..(next + 1) * size, current * size);
                } else {
                    self.data[current * size..(current + 1) * size].copy_from_slice(&temp);
                }
                current = next;
            }
        }

        self.rebuild_index();
        Ok(())
    }

    /// Recomputes the header bounds and the live point count.
    ///
    /// Call after bulk mutations so downstream stages see accurate
    /// metadata.
    pub fn update_header(&mut self) {
        self.reset_cursor();
        let mut bounds = crate::Bounds::default();
        let mut count = 0;
        while let Some(index) = self.read_point(false) {
            let point = self.view(index);
            bounds.grow(point.x(), point.y(), point.z());
            count += 1;
        }
        self.header.bounds = bounds;
        self.header.number_of_points = count;
    }

    /// Builds (or rebuilds) the 2D grid index and the 3D kd-tree.
    pub fn build_index(&mut self) {
        if self.npoints == 0 {
            self.index = Some(GridPartition::new(0.0, 0.0, 0.0, 0.0, 1.0));
            self.kdtree = None;
            return;
        }

        let bounds = &self.header.bounds;
        let resolution = GridPartition::resolution_from_density(self.header.density());
        let mut index = GridPartition::new(
            bounds.min.x,
            bounds.min.y,
            bounds.max.x,
            bounds.max.y,
            resolution,
        );
        let mut nodes = Vec::with_capacity(self.npoints);
        for i in 0..self.npoints {
            let point = self.view(i);
            index.insert(point.x(), point.y());
            nodes.push(([point.x(), point.y(), point.z()], i as u32));
        }
        self.index = Some(index);
        self.kdtree = Some(KdTree::build(nodes));
    }

    /// Is a spatial index available?
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    fn rebuild_index(&mut self) {
        self.reset_cursor();
        if self.index.is_some() || self.kdtree.is_some() {
            self.build_index();
        }
    }

    fn reset_cursor(&mut self) {
        self.cursor = Cursor::default();
    }

    fn accept(&self, index: usize, filter: Option<&PointFilter>) -> bool {
        let point = self.view(index);
        if point.deleted() {
            return false;
        }
        match filter {
            Some(filter) => !filter.reject(&point),
            None => true,
        }
    }

    /// Collects the indices of the live points inside a shape.
    ///
    /// Thread-safe: may be called concurrently as long as no writer is
    /// active.
    pub fn query_shape(&self, shape: &Shape, out: &mut Vec<u32>, filter: Option<&PointFilter>) {
        out.clear();
        let mut intervals = Vec::new();
        match &self.index {
            Some(index) => {
                index.query(shape.xmin(), shape.ymin(), shape.xmax(), shape.ymax(), &mut intervals)
            }
            None if self.npoints > 0 => {
                intervals.push(Interval::new(0, self.npoints as u32 - 1))
            }
            None => {}
        }
        Interval::merge(&mut intervals);
        for interval in intervals {
            for i in interval.start..=interval.end {
                let point = self.view(i as usize);
                if shape.contains(point.x(), point.y()) && self.accept(i as usize, filter) {
                    out.push(i);
                }
            }
        }
    }

    /// Collects the live points of caller-supplied intervals, without any
    /// shape test.
    pub fn query_intervals(
        &self,
        intervals: &[Interval],
        out: &mut Vec<u32>,
        filter: Option<&PointFilter>,
    ) {
        out.clear();
        for interval in intervals {
            for i in interval.start..=interval.end {
                if self.accept(i as usize, filter) {
                    out.push(i);
                }
            }
        }
    }

    /// The `k` nearest live points to a location, closest first.
    ///
    /// The kd-tree search widens geometrically until `k` points pass the
    /// filter and the deleted test, or every live point has been seen.
    pub fn knn(
        &self,
        position: [f64; 3],
        k: usize,
        out: &mut Vec<u32>,
        filter: Option<&PointFilter>,
    ) {
        out.clear();
        let Some(kdtree) = &self.kdtree else {
            return;
        };
        let total = kdtree.len();
        let mut search_k = k;
        loop {
            out.clear();
            for neighbor in kdtree.knn(position, search_k) {
                if self.accept(neighbor.index as usize, filter) {
                    out.push(neighbor.index);
                    if out.len() == k {
                        return;
                    }
                }
            }
            if search_k >= total {
                return;
            }
            search_k = (search_k * 2).min(total);
        }
    }

    /// Radius-bounded knn: the closest `k` live points within `radius`.
    pub fn rknn(
        &self,
        position: [f64; 3],
        k: usize,
        radius: f64,
        out: &mut Vec<u32>,
        filter: Option<&PointFilter>,
    ) {
        out.clear();
        let Some(kdtree) = &self.kdtree else {
            return;
        };
        let mut neighbors = Vec::new();
        kdtree.radius(position, radius, &mut neighbors);
        for neighbor in neighbors {
            if out.len() == k {
                break;
            }
            if self.accept(neighbor.index as usize, filter) {
                out.push(neighbor.index);
            }
        }
    }

    /// All live points within `radius` of a location, closest first.
    pub fn query_sphere(
        &self,
        position: [f64; 3],
        radius: f64,
        out: &mut Vec<u32>,
        filter: Option<&PointFilter>,
    ) {
        out.clear();
        let Some(kdtree) = &self.kdtree else {
            return;
        };
        let mut neighbors = Vec::new();
        kdtree.radius(position, radius, &mut neighbors);
        for neighbor in neighbors {
            if self.accept(neighbor.index as usize, filter) {
                out.push(neighbor.index);
            }
        }
    }

    /// Random access to a live point passing the filter.
    pub fn get_point(&self, position: usize, filter: Option<&PointFilter>) -> Option<PointRef<'_>> {
        if position >= self.npoints || !self.accept(position, filter) {
            return None;
        }
        Some(self.view(position))
    }

    /// Adds an attribute to the schema, rewriting every record in place.
    ///
    /// Adding an attribute that already exists with an identical definition
    /// is a no-op; a mismatched definition is an error. Records are rewritten
    /// from the last to the first so the move never clobbers unread bytes;
    /// the new attribute's bytes are zeroed.
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<()> {
        if let Some(existing) = self.header.schema.find(&attribute.name) {
            if existing.same_definition(&attribute) {
                return Ok(());
            }
            return Err(Error::DuplicateAttribute(attribute.name));
        }
        self.add_new_attributes(vec![attribute])
    }

    /// Batched attribute addition: one growth, one rewrite pass.
    pub fn add_attributes(&mut self, attributes: &[Attribute]) -> Result<()> {
        let mut new = Vec::new();
        for attribute in attributes {
            if let Some(existing) = self.header.schema.find(&attribute.name) {
                if existing.same_definition(attribute) {
                    continue;
                }
                return Err(Error::DuplicateAttribute(attribute.name.clone()));
            }
            new.push(attribute.clone());
        }
        if new.is_empty() {
            return Ok(());
        }
        self.add_new_attributes(new)
    }

    fn add_new_attributes(&mut self, attributes: Vec<Attribute>) -> Result<()> {
        let old_size = self.point_size();
        for attribute in attributes {
            self.header.schema.add_attribute(attribute);
        }
        let new_size = self.point_size();
        if new_size == old_size {
            // a bit attribute reusing an open flag byte
            return Ok(());
        }

        // last to first, so the move never clobbers unread bytes; the
        // spatial indices reference point order and stay valid
        self.data.resize(self.npoints * new_size, 0);
        for i in (0..self.npoints).rev() {
            self.data.copy_within(i * old_size..(i + 1) * old_size, i * new_size);
            self.data[i * new_size + old_size..(i + 1) * new_size].fill(0);
        }
        Ok(())
    }

    /// Shorthand for adding `{R, G, B}` color channels.
    pub fn add_rgb(&mut self) -> Result<()> {
        self.add_attributes(&[
            Attribute::new("R", crate::AttributeType::Int16).describe("Red channel"),
            Attribute::new("G", crate::AttributeType::Int16).describe("Green channel"),
            Attribute::new("B", crate::AttributeType::Int16).describe("Blue channel"),
        ])
    }

    /// Removes an attribute, closing the gap in every record.
    ///
    /// The mandatory prefix (flags, X, Y, Z) cannot be removed. Removing an
    /// absent attribute is a no-op.
    pub fn remove_attribute(&mut self, name: &str) -> Result<()> {
        let name = Schema::normalize_name(name);
        if matches!(name, "flags" | "X" | "Y" | "Z") {
            return Err(Error::ReservedAttribute(name.to_string()));
        }
        let Some(attribute) = self.header.schema.find(name).cloned() else {
            return Ok(());
        };

        let old_size = self.point_size();
        self.header.schema.remove_attribute(name);
        let new_size = self.point_size();
        if new_size == old_size {
            // a shared bit: the flag byte stays in place
            return Ok(());
        }

        let offset = attribute.offset;
        let removed = attribute.size;
        let tail = old_size - offset - removed;
        for i in 0..self.npoints {
            let src = i * old_size;
            let dst = i * new_size;
            if i != 0 && offset > 0 {
                self.data.copy_within(src..src + offset, dst);
            }
            if tail > 0 {
                self.data
                    .copy_within(src + offset + removed..src + old_size, dst + offset);
            }
        }
        self.data.truncate(self.npoints * new_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeType, Bounds};

    fn cloud_with(n: usize) -> PointCloud {
        let mut header = Header::default();
        header.number_of_points = n as u64;
        header.schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        let mut cloud = PointCloud::new(header);
        let mut point = Point::new(cloud.schema());
        for i in 0..n {
            point.zero();
            point.set_x(i as f64);
            point.set_y(i as f64);
            point.set_z(i as f64 / 10.0);
            point.set_value("Intensity", i as f64);
            cloud.add_point(&point).unwrap();
        }
        cloud.update_header();
        cloud
    }

    fn xyz(cloud: &PointCloud) -> Vec<(i32, i32, i32)> {
        (0..cloud.len())
            .filter(|&i| !cloud.view(i).deleted())
            .map(|i| {
                let p = cloud.view(i);
                (p.raw_x(), p.raw_y(), p.raw_z())
            })
            .collect()
    }

    #[test]
    fn read_point_visits_everything_once() {
        let mut cloud = cloud_with(10);
        let mut seen = Vec::new();
        while let Some(i) = cloud.read_point(false) {
            seen.push(i);
        }
        assert_eq!((0..10).collect::<Vec<_>>(), seen);
        // the cursor reset itself, a second pass works
        assert_eq!(Some(0), cloud.read_point(false));
    }

    #[test]
    fn read_point_inside_shape() {
        let mut cloud = cloud_with(100);
        cloud.build_index();
        cloud.set_inside(Shape::rectangle(10.0, 10.0, 19.5, 19.5));
        let mut count = 0;
        while let Some(i) = cloud.read_point(false) {
            assert!((10..20).contains(&i));
            count += 1;
        }
        assert_eq!(10, count);
    }

    #[test]
    fn soft_delete_decrements_header() {
        let mut cloud = cloud_with(10);
        cloud.delete_point(3);
        cloud.delete_point(3);
        assert_eq!(9, cloud.header().number_of_points);
        assert_eq!(10, cloud.len());
        let visited: Vec<usize> = std::iter::from_fn(|| cloud.read_point(false)).collect();
        assert!(!visited.contains(&3));
    }

    #[test]
    fn compaction_threshold() {
        let mut cloud = cloud_with(100);
        for i in 0..10 {
            cloud.delete_point(i);
        }
        // only 10% deleted, stays soft
        assert!(!cloud.delete_deleted());
        assert_eq!(100, cloud.len());
        for i in 10..40 {
            cloud.delete_point(i);
        }
        assert!(cloud.delete_deleted());
        assert_eq!(60, cloud.len());
        // survivors keep their relative order
        let p = cloud.view(0);
        assert_eq!(40.0, p.x());
    }

    #[test]
    fn coordinates_survive_attribute_churn() {
        let mut cloud = cloud_with(10);
        let before = xyz(&cloud);
        cloud
            .add_attribute(Attribute::new("Classification", AttributeType::Uint8))
            .unwrap();
        assert_eq!(before, xyz(&cloud));
        cloud.add_rgb().unwrap();
        assert_eq!(before, xyz(&cloud));
        cloud.remove_attribute("Classification").unwrap();
        assert_eq!(before, xyz(&cloud));
        cloud.remove_attribute("R").unwrap();
        cloud.remove_attribute("G").unwrap();
        cloud.remove_attribute("B").unwrap();
        assert_eq!(before, xyz(&cloud));
        // intensity was before the removed attributes and is untouched
        assert_eq!(Some(7.0), cloud.view(7).value("Intensity"));
    }

    #[test]
    fn add_remove_round_trip_restores_schema() {
        let mut cloud = cloud_with(10);
        let schema_before = cloud.schema().clone();
        cloud
            .add_attribute(Attribute::new("Classification", AttributeType::Uint8))
            .unwrap();
        cloud.remove_attribute("Classification").unwrap();
        assert_eq!(schema_before, *cloud.schema());
    }

    #[test]
    fn duplicate_attribute_definitions() {
        let mut cloud = cloud_with(5);
        // identical definition: no-op
        cloud
            .add_attribute(Attribute::new("Intensity", AttributeType::Uint16))
            .unwrap();
        // same name, different type: error
        assert!(matches!(
            cloud.add_attribute(Attribute::new("Intensity", AttributeType::Double)),
            Err(Error::DuplicateAttribute(_))
        ));
    }

    #[test]
    fn reserved_attributes_cannot_be_removed() {
        let mut cloud = cloud_with(5);
        assert!(cloud.remove_attribute("z").is_err());
        assert!(cloud.remove_attribute("flags").is_err());
    }

    #[test]
    fn sort_applies_permutation() {
        let mut cloud = cloud_with(5);
        // reverse the points: destination i takes source 4 - i
        cloud.sort(&[4, 3, 2, 1, 0]).unwrap();
        assert_eq!(4.0, cloud.view(0).x());
        assert_eq!(0.0, cloud.view(4).x());
        assert!(cloud.sort(&[0, 1]).is_err());
    }

    #[test]
    fn query_shape_completeness() {
        let mut cloud = cloud_with(100);
        cloud.build_index();
        let mut out = Vec::new();
        cloud.query_shape(
            &Shape::rectangle(20.0, 20.0, 29.0, 29.0),
            &mut out,
            None,
        );
        out.sort_unstable();
        assert_eq!((20..30).collect::<Vec<u32>>(), out);
    }

    #[test]
    fn knn_returns_k_sorted_live_points() {
        let mut cloud = cloud_with(50);
        cloud.build_index();
        let mut out = Vec::new();
        cloud.knn([25.0, 25.0, 2.5], 5, &mut out, None);
        assert_eq!(5, out.len());
        assert_eq!(25, out[0]);
        // deleting the nearest point promotes the next one
        cloud.delete_point(25);
        cloud.knn([25.0, 25.0, 2.5], 5, &mut out, None);
        assert_eq!(5, out.len());
        assert!(!out.contains(&25));
    }

    #[test]
    fn knn_with_fewer_live_points_than_k() {
        let mut cloud = cloud_with(3);
        cloud.build_index();
        let mut out = Vec::new();
        cloud.knn([0.0, 0.0, 0.0], 10, &mut out, None);
        assert_eq!(3, out.len());
    }

    #[test]
    fn sphere_and_rknn() {
        let mut cloud = cloud_with(100);
        cloud.build_index();
        let mut out = Vec::new();
        // points are on the x=y diagonal, spacing sqrt(2) in xy
        cloud.query_sphere([10.0, 10.0, 1.0], 2.0, &mut out, None);
        assert_eq!(3, out.len());
        assert_eq!(10, out[0]);
        cloud.rknn([10.0, 10.0, 1.0], 2, 2.0, &mut out, None);
        assert_eq!(2, out.len());
    }

    #[test]
    fn update_header_tracks_bounds() {
        let mut cloud = cloud_with(10);
        assert_eq!(
            Bounds::new(0.0, 0.0, 0.0, 9.0, 9.0, 0.9),
            cloud.header().bounds
        );
        cloud.delete_point(9);
        cloud.update_header();
        assert_eq!(8.0, cloud.header().bounds.max.x);
        assert_eq!(9, cloud.header().number_of_points);
    }

    #[test]
    fn from_raster() {
        let mut raster = Raster::new(0.0, 0.0, 30.0, 30.0, 10.0);
        raster.set_value(0, 5.0);
        raster.set_value(4, 7.5);
        let cloud = PointCloud::from_raster(&raster).unwrap();
        assert_eq!(2, cloud.len());
        assert_eq!(7.5, cloud.view(1).z());
        assert!(cloud.is_indexed());
    }

    #[test]
    fn intervals_cursor() {
        let mut cloud = cloud_with(20);
        cloud.set_intervals(vec![Interval::new(2, 4), Interval::new(10, 11)]);
        let seen: Vec<usize> = std::iter::from_fn(|| cloud.read_point(false)).collect();
        assert_eq!(vec![2, 3, 4, 10, 11], seen);
    }
}
