//! 2D cell grids and the interval-based point grouper behind spatial
//! indexing.

use std::collections::HashMap;

/// A contiguous, inclusive range of point indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// First point index of the range.
    pub start: u32,
    /// Last point index of the range, inclusive.
    pub end: u32,
}

impl Interval {
    /// Creates an interval.
    pub fn new(start: u32, end: u32) -> Interval {
        Interval { start, end }
    }

    /// The number of points covered.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Never true; an interval covers at least one point.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sorts intervals by start and fuses ranges that touch or overlap.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::Interval;
    /// let mut intervals = vec![
    ///     Interval::new(8, 9),
    ///     Interval::new(0, 3),
    ///     Interval::new(4, 5),
    /// ];
    /// Interval::merge(&mut intervals);
    /// assert_eq!(vec![Interval::new(0, 5), Interval::new(8, 9)], intervals);
    /// ```
    pub fn merge(intervals: &mut Vec<Interval>) {
        if intervals.len() < 2 {
            return;
        }
        intervals.sort_by_key(|interval| interval.start);
        let mut merged = Vec::with_capacity(intervals.len() / 2);
        let mut previous = intervals[0];
        for &current in intervals.iter().skip(1) {
            if current.start <= previous.end + 1 {
                previous.end = previous.end.max(current.end);
            } else {
                merged.push(previous);
                previous = current;
            }
        }
        merged.push(previous);
        *intervals = merged;
    }
}

/// A uniform 2D grid over an extent.
///
/// Cells are numbered row-major starting at the top-left corner, rows running
/// from the top down, which matches raster conventions.
#[derive(Clone, Debug)]
pub struct Grid {
    ncols: usize,
    nrows: usize,
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    xres: f64,
    yres: f64,
}

impl Grid {
    /// Creates a grid with square cells of the given resolution.
    ///
    /// The extent is expanded to a whole number of cells.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::Grid;
    /// let grid = Grid::new(0.0, 0.0, 100.0, 100.0, 25.0);
    /// assert_eq!(16, grid.ncells());
    /// ```
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, resolution: f64) -> Grid {
        let ncols = ((xmax - xmin) / resolution).ceil().max(1.0) as usize;
        let nrows = ((ymax - ymin) / resolution).ceil().max(1.0) as usize;
        Grid {
            ncols,
            nrows,
            xmin,
            ymin,
            xmax: xmin + ncols as f64 * resolution,
            ymax: ymin + nrows as f64 * resolution,
            xres: resolution,
            yres: resolution,
        }
    }

    /// Creates a grid with explicit row and column counts.
    pub fn with_dimensions(
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
        nrows: usize,
        ncols: usize,
    ) -> Grid {
        Grid {
            ncols,
            nrows,
            xmin,
            ymin,
            xmax,
            ymax,
            xres: (xmax - xmin) / ncols as f64,
            yres: (ymax - ymin) / nrows as f64,
        }
    }

    /// The cell containing the location, or `None` when outside the extent.
    pub fn cell_from_xy(&self, x: f64, y: f64) -> Option<usize> {
        if x < self.xmin || x > self.xmax || y < self.ymin || y > self.ymax {
            return None;
        }
        let col = (((x - self.xmin) / self.xres) as usize).min(self.ncols - 1);
        let row = (((self.ymax - y) / self.yres) as usize).min(self.nrows - 1);
        Some(row * self.ncols + col)
    }

    /// The column of a cell.
    pub fn col_from_cell(&self, cell: usize) -> usize {
        cell % self.ncols
    }

    /// The row of a cell.
    pub fn row_from_cell(&self, cell: usize) -> usize {
        cell / self.ncols
    }

    /// The x coordinate of a cell center.
    pub fn x_from_cell(&self, cell: usize) -> f64 {
        self.xmin + (self.col_from_cell(cell) as f64 + 0.5) * self.xres
    }

    /// The y coordinate of a cell center.
    pub fn y_from_cell(&self, cell: usize) -> f64 {
        self.ymax - (self.row_from_cell(cell) as f64 + 0.5) * self.yres
    }

    /// The number of cells.
    pub fn ncells(&self) -> usize {
        self.ncols * self.nrows
    }

    /// The number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// The number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Left edge of the gridded extent.
    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    /// Bottom edge of the gridded extent.
    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    /// Right edge of the gridded extent.
    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    /// Top edge of the gridded extent.
    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    /// Cell width.
    pub fn xres(&self) -> f64 {
        self.xres
    }

    /// Cell height.
    pub fn yres(&self) -> f64 {
        self.yres
    }

    /// Collects the cells whose footprint intersects the rectangle.
    pub fn cells_in(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64, cells: &mut Vec<usize>) {
        let colmin = (((xmin - self.xmin) / self.xres).floor().max(0.0)) as usize;
        let rowmin = (((self.ymax - ymax) / self.yres).floor().max(0.0)) as usize;
        if colmin >= self.ncols || rowmin >= self.nrows || xmax < self.xmin || ymin > self.ymax {
            return;
        }
        let colmax = ((((xmax - self.xmin) / self.xres).floor()) as usize).min(self.ncols - 1);
        let rowmax = ((((self.ymax - ymin) / self.yres).floor()) as usize).min(self.nrows - 1);
        for row in rowmin..=rowmax {
            for col in colmin..=colmax {
                cells.push(row * self.ncols + col);
            }
        }
    }
}

/// A 2D grid index mapping each cell to the intervals of point indices that
/// fall in it.
///
/// Points are inserted in storage order; consecutive indices landing in the
/// same cell coalesce into a single interval, which keeps the index tiny on
/// spatially sorted data.
#[derive(Clone, Debug)]
pub struct GridPartition {
    grid: Grid,
    map: HashMap<usize, Vec<Interval>>,
    npoints: u32,
}

impl GridPartition {
    /// Creates an empty partition over the extent.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, resolution: f64) -> GridPartition {
        GridPartition {
            grid: Grid::new(xmin, ymin, xmax, ymax, resolution),
            map: HashMap::new(),
            npoints: 0,
        }
    }

    /// Picks an index resolution from the point density, in CRS-linear
    /// units.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::GridPartition;
    /// assert_eq!(10.0, GridPartition::resolution_from_density(0.5));
    /// assert_eq!(1.0, GridPartition::resolution_from_density(12.0));
    /// assert_eq!(0.25, GridPartition::resolution_from_density(500.0));
    /// ```
    pub fn resolution_from_density(density: f64) -> f64 {
        let mut resolution = 10.0;
        if density > 1.0 {
            resolution = 5.0;
        }
        if density > 5.0 {
            resolution = 2.0;
        }
        if density > 10.0 {
            resolution = 1.0;
        }
        if density > 50.0 {
            resolution = 0.5;
        }
        if density > 100.0 {
            resolution = 0.25;
        }
        resolution
    }

    /// Inserts the next point; returns false when the location is outside
    /// the indexed extent.
    pub fn insert(&mut self, x: f64, y: f64) -> bool {
        let Some(cell) = self.grid.cell_from_xy(x, y) else {
            self.npoints += 1;
            return false;
        };
        let intervals = self.map.entry(cell).or_default();
        match intervals.last_mut() {
            Some(interval) if interval.end + 1 == self.npoints => interval.end = self.npoints,
            _ => intervals.push(Interval::new(self.npoints, self.npoints)),
        }
        self.npoints += 1;
        true
    }

    /// Collects the intervals of every cell intersecting the rectangle.
    pub fn query(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64, out: &mut Vec<Interval>) {
        let mut cells = Vec::new();
        self.grid.cells_in(xmin, ymin, xmax, ymax, &mut cells);
        for cell in cells {
            if let Some(intervals) = self.map.get(&cell) {
                out.extend_from_slice(intervals);
            }
        }
    }

    /// The intervals of one cell, when any point landed there.
    pub fn cell_intervals(&self, cell: usize) -> Option<&[Interval]> {
        self.map.get(&cell).map(Vec::as_slice)
    }

    /// The populated cells and their intervals, unordered.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[Interval])> {
        self.map.iter().map(|(cell, intervals)| (*cell, intervals.as_slice()))
    }

    /// The largest number of points grouped in a single cell.
    pub fn largest_group_size(&self) -> usize {
        self.map
            .values()
            .map(|intervals| intervals.iter().map(Interval::len).sum())
            .max()
            .unwrap_or(0)
    }

    /// The grid backing this partition.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The number of inserted points.
    pub fn npoints(&self) -> u32 {
        self.npoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_math() {
        let grid = Grid::new(0.0, 0.0, 100.0, 100.0, 10.0);
        assert_eq!(100, grid.ncells());
        // top-left cell is zero
        assert_eq!(Some(0), grid.cell_from_xy(5.0, 95.0));
        assert_eq!(Some(99), grid.cell_from_xy(95.0, 5.0));
        assert_eq!(None, grid.cell_from_xy(-1.0, 5.0));
        assert_eq!(5.0, grid.x_from_cell(0));
        assert_eq!(95.0, grid.y_from_cell(0));
    }

    #[test]
    fn cells_in_rectangle() {
        let grid = Grid::new(0.0, 0.0, 100.0, 100.0, 10.0);
        let mut cells = Vec::new();
        grid.cells_in(0.0, 0.0, 15.0, 15.0, &mut cells);
        assert_eq!(4, cells.len());
        cells.clear();
        grid.cells_in(200.0, 200.0, 300.0, 300.0, &mut cells);
        assert!(cells.is_empty());
    }

    #[test]
    fn insert_coalesces_consecutive_indices() {
        let mut partition = GridPartition::new(0.0, 0.0, 100.0, 100.0, 10.0);
        partition.insert(5.0, 5.0);
        partition.insert(6.0, 6.0);
        partition.insert(55.0, 55.0);
        partition.insert(7.0, 7.0);
        let cell = partition.grid().cell_from_xy(5.0, 5.0).unwrap();
        assert_eq!(
            &[Interval::new(0, 1), Interval::new(3, 3)],
            partition.cell_intervals(cell).unwrap()
        );
        assert_eq!(3, partition.largest_group_size());
    }

    #[test]
    fn query_returns_intervals() {
        let mut partition = GridPartition::new(0.0, 0.0, 100.0, 100.0, 10.0);
        for i in 0..10 {
            partition.insert(5.0 + f64::from(i) * 10.0, 5.0);
        }
        let mut intervals = Vec::new();
        partition.query(0.0, 0.0, 25.0, 9.0, &mut intervals);
        Interval::merge(&mut intervals);
        assert_eq!(vec![Interval::new(0, 2)], intervals);
    }
}
