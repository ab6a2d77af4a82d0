//! A minimal in-memory raster.
//!
//! Raster-producing stages own one of these per chunk (or one master grid in
//! merged mode). Persisting a raster to a GIS format is delegated to an
//! external library; the engine only needs cell storage, nodata handling and
//! the chunk-wise re-anchoring used by the merged/non-merged writer modes.

use crate::{Chunk, Crs, Grid};

/// The nodata marker used by freshly created rasters.
pub const NODATA: f32 = -99999.0;

/// A single-band grid of f32 cells with a nodata value.
#[derive(Clone, Debug)]
pub struct Raster {
    grid: Grid,
    values: Vec<f32>,
    nodata: f32,
    crs: Crs,
    band_name: String,
}

impl Raster {
    /// Creates a raster over an extent, every cell set to nodata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::Raster;
    /// let raster = Raster::new(0.0, 0.0, 100.0, 100.0, 10.0);
    /// assert_eq!(100, raster.ncells());
    /// assert!(raster.is_nodata(raster.value(0)));
    /// ```
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, resolution: f64) -> Raster {
        let grid = Grid::new(xmin, ymin, xmax, ymax, resolution);
        let values = vec![NODATA; grid.ncells()];
        Raster {
            grid,
            values,
            nodata: NODATA,
            crs: Crs::default(),
            band_name: "Z".to_string(),
        }
    }

    /// Creates a raster over a chunk's core extent, reusing a template's
    /// resolution, CRS and band name.
    ///
    /// This is the non-merged path: one fresh dataset per chunk.
    pub fn from_template(template: &Raster, chunk: &Chunk) -> Raster {
        let mut raster = Raster::new(
            chunk.xmin,
            chunk.ymin,
            chunk.xmax,
            chunk.ymax,
            template.grid.xres(),
        );
        raster.crs = template.crs.clone();
        raster.band_name = template.band_name.clone();
        raster.nodata = template.nodata;
        raster
    }

    /// The backing grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The number of cells.
    pub fn ncells(&self) -> usize {
        self.values.len()
    }

    /// The cell value.
    pub fn value(&self, cell: usize) -> f32 {
        self.values[cell]
    }

    /// Is this value the nodata marker?
    pub fn is_nodata(&self, value: f32) -> bool {
        value == self.nodata
    }

    /// Sets a cell value.
    pub fn set_value(&mut self, cell: usize, value: f32) {
        self.values[cell] = value;
    }

    /// Updates a cell with the maximum of its current and the new value.
    pub fn update_max(&mut self, cell: usize, value: f32) {
        let current = self.values[cell];
        if current == self.nodata || value > current {
            self.values[cell] = value;
        }
    }

    /// Updates a cell with the minimum of its current and the new value.
    pub fn update_min(&mut self, cell: usize, value: f32) {
        let current = self.values[cell];
        if current == self.nodata || value < current {
            self.values[cell] = value;
        }
    }

    /// Adds to a cell, treating nodata as zero.
    pub fn update_add(&mut self, cell: usize, value: f32) {
        let current = self.values[cell];
        self.values[cell] = if current == self.nodata {
            value
        } else {
            current + value
        };
    }

    /// Copies every non-nodata cell of `other` into this raster by world
    /// position.
    ///
    /// This is how merged-mode rasters absorb per-worker results.
    pub fn absorb(&mut self, other: &Raster) {
        for cell in 0..other.ncells() {
            let value = other.values[cell];
            if other.is_nodata(value) {
                continue;
            }
            let x = other.grid.x_from_cell(cell);
            let y = other.grid.y_from_cell(cell);
            if let Some(target) = self.grid.cell_from_xy(x, y) {
                self.values[target] = value;
            }
        }
    }

    /// The nodata marker.
    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// The raster CRS.
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Sets the raster CRS.
    pub fn set_crs(&mut self, crs: Crs) {
        self.crs = crs;
    }

    /// The band name.
    pub fn band_name(&self) -> &str {
        &self.band_name
    }

    /// Sets the band name.
    pub fn set_band_name(&mut self, name: impl Into<String>) {
        self.band_name = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates() {
        let mut raster = Raster::new(0.0, 0.0, 10.0, 10.0, 10.0);
        raster.update_max(0, 5.0);
        raster.update_max(0, 3.0);
        assert_eq!(5.0, raster.value(0));
        raster.update_min(0, 3.0);
        assert_eq!(3.0, raster.value(0));
        raster.update_add(0, 1.0);
        assert_eq!(4.0, raster.value(0));
    }

    #[test]
    fn absorb_by_position() {
        let mut master = Raster::new(0.0, 0.0, 20.0, 10.0, 10.0);
        let mut tile = Raster::new(10.0, 0.0, 20.0, 10.0, 10.0);
        tile.set_value(0, 7.0);
        master.absorb(&tile);
        assert_eq!(7.0, master.value(1));
        assert!(master.is_nodata(master.value(0)));
    }
}
