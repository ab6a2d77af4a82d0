//! Prints a summary of the chunk header.

use super::{Stage, StageBase};
use crate::{Chunk, Header, Result};
use log::info;
use std::any::Any;

fn human_readable(value: u64, units: &[&str]) -> String {
    let mut display = value as f64;
    let mut unit = 0;
    while display >= 1000.0 && unit < units.len() - 1 {
        display /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", display, units[unit])
}

/// A header-only stage logging the source, extent, density and schema of
/// each chunk. Never pulls points.
#[derive(Clone, Debug, Default)]
pub struct Info {
    base: StageBase,
    printed: bool,
}

impl Info {
    /// Creates the stage.
    pub fn new() -> Info {
        Info::default()
    }
}

impl Stage for Info {
    fn name(&self) -> &'static str {
        "info"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.base.set_chunk(chunk);
        self.printed = false;
        Ok(())
    }

    fn process_header(&mut self, header: &mut Option<Header>) -> Result<()> {
        let Some(header) = header else { return Ok(()) };
        if self.printed {
            return Ok(());
        }
        self.printed = true;

        let npoints = header.number_of_points;
        let size = npoints * header.schema.total_point_size() as u64;
        let area = header.area();
        let units = if self.base.crs.is_meters() { "m" } else { "units" };

        info!("Source       : {} (v{}.{})", header.signature.as_str(), header.version.0, header.version.1);
        info!("Size         : {}", human_readable(size, &["B", "kB", "MB", "GB", "TB"]));
        info!(
            "Extent       : {:.2} {:.2} {:.2} {:.2} (xmin, xmax, ymin, ymax)",
            header.bounds.min.x, header.bounds.max.x, header.bounds.min.y, header.bounds.max.y
        );
        info!(
            "Points       : {}",
            human_readable(npoints, &["", "thousands", "millions", "billions"])
        );
        info!("Area         : {:.1} {units}\u{b2}", area);
        info!("Density      : {:.1} pts/{units}\u{b2}", header.density());
        info!(
            "Schema       : {} attributes | {} bytes per point",
            header.schema.len(),
            header.schema.total_point_size()
        );
        for attribute in header.schema.attributes() {
            if self.base.verbose {
                info!(
                    " Name: {:<17} | Offset: {:<2} | Size: {:<1} | Type: {:<6} | Scale: {:<5.3} | Offset: {:<5.3}",
                    attribute.name,
                    attribute.offset,
                    attribute.size,
                    attribute.data_type.name(),
                    attribute.scale_factor,
                    attribute.value_offset
                );
            } else {
                info!(
                    " Name: {:<17} | {:<6} | Desc: {}",
                    attribute.name,
                    attribute.data_type.name(),
                    attribute.description
                );
            }
        }
        Ok(())
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_streamable(&self) -> bool {
        true
    }

    // interleaved logging from worker threads would be unreadable
    fn is_parallelizable(&self) -> bool {
        false
    }
}
