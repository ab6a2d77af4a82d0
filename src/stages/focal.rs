//! A focal (moving window) filter over a connected raster stage.

use super::{Stage, StageBase, WriterOutput};
use crate::{Error, Raster, Result};
use rayon::prelude::*;
use serde_json::Value;
use std::any::Any;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Function {
    Mean,
    Min,
    Max,
}

/// Applies a square moving-window function to the raster produced by a
/// connected stage.
///
/// This is the raster-to-raster connection: `connect` names an upstream
/// raster stage by uid, and per chunk this stage runs with no payload of
/// its own, reading the upstream grid. Cells are independent, so the window
/// evaluation fans out over the stage's thread budget.
#[derive(Clone, Debug)]
pub struct Focal {
    base: StageBase,
    out: WriterOutput,
    connection: Option<usize>,
    size: f64,
    function: Function,
    raster: Option<Raster>,
}

impl Focal {
    /// Creates the stage with a 3-unit default window.
    pub fn new() -> Focal {
        Focal {
            base: StageBase::default(),
            out: WriterOutput::default(),
            connection: None,
            size: 3.0,
            function: Function::Mean,
            raster: None,
        }
    }
}

impl Default for Focal {
    fn default() -> Focal {
        Focal::new()
    }
}

impl Stage for Focal {
    fn name(&self) -> &'static str {
        "focal"
    }

    fn base(&self) -> &StageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StageBase {
        &mut self.base
    }

    fn clone_stage(&self) -> Box<dyn Stage> {
        let mut clone = self.clone();
        clone.out = self.out.worker_clone();
        Box::new(clone)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_parameters(&mut self, parameters: &Value) -> Result<()> {
        if let Some(size) = parameters.get("size").and_then(Value::as_f64) {
            self.size = size;
        }
        self.function = match parameters.get("fun").and_then(Value::as_str) {
            Some("min") => Function::Min,
            Some("max") => Function::Max,
            _ => Function::Mean,
        };
        Ok(())
    }

    fn set_output_file(&mut self, path: &str) -> Result<()> {
        self.out.set_output_file(path);
        Ok(())
    }

    fn set_input_file_name(&mut self, stem: &str) -> Result<()> {
        self.out.set_input_stem(stem);
        Ok(())
    }

    fn connect(&mut self, index: usize, upstream: &dyn Stage) -> Result<()> {
        // connecting to anything that cannot produce a raster is a
        // configuration error, caught here at parse time
        if !upstream.produces_raster() {
            return Err(Error::InvalidConnection {
                uid: upstream.uid(),
                name: self.name().to_string(),
            });
        }
        self.connection = Some(index);
        Ok(())
    }

    fn connection(&self) -> Option<usize> {
        self.connection
    }

    fn process_connected(&mut self, upstream: &dyn Stage) -> Result<()> {
        let Some(source) = upstream.raster() else {
            return Err(Error::InvalidConnection {
                uid: upstream.uid(),
                name: self.name().to_string(),
            });
        };

        let grid = source.grid();
        let radius = ((self.size / 2.0) / grid.xres()).floor() as isize;
        let (ncols, nrows) = (grid.ncols() as isize, grid.nrows() as isize);
        let function = self.function;
        let nodata = source.nodata();

        let values: Vec<f32> = (0..grid.ncells() as isize)
            .into_par_iter()
            .map(|cell| {
                let (row, col) = (cell / ncols, cell % ncols);
                let mut accumulator: f64 = 0.0;
                let mut count = 0;
                let mut minimum = f32::INFINITY;
                let mut maximum = f32::NEG_INFINITY;
                for dr in -radius..=radius {
                    for dc in -radius..=radius {
                        let (r, c) = (row + dr, col + dc);
                        if r < 0 || r >= nrows || c < 0 || c >= ncols {
                            continue;
                        }
                        let value = source.value((r * ncols + c) as usize);
                        if value == nodata {
                            continue;
                        }
                        accumulator += f64::from(value);
                        count += 1;
                        minimum = minimum.min(value);
                        maximum = maximum.max(value);
                    }
                }
                if count == 0 {
                    return nodata;
                }
                match function {
                    Function::Mean => (accumulator / f64::from(count)) as f32,
                    Function::Min => minimum,
                    Function::Max => maximum,
                }
            })
            .collect();

        let mut result = source.clone();
        for (cell, value) in values.into_iter().enumerate() {
            result.set_value(cell, value);
        }
        self.raster = Some(result);
        Ok(())
    }

    fn merge(&mut self, other: &dyn Stage) {
        let Some(other) = other.as_any().downcast_ref::<Focal>() else {
            return;
        };
        self.out.merge(&other.out);
        if self.out.merged() {
            if let (Some(mine), Some(theirs)) = (&mut self.raster, &other.raster) {
                mine.absorb(theirs);
            } else if self.raster.is_none() {
                self.raster = other.raster.clone();
            }
        }
    }

    fn sort(&mut self, order: &[usize]) {
        self.out.sort(order);
    }

    fn output(&self) -> Value {
        self.out.output()
    }

    fn produces_raster(&self) -> bool {
        true
    }

    fn raster(&self) -> Option<&Raster> {
        self.raster.as_ref()
    }

    fn need_buffer(&self) -> f64 {
        self.size / 2.0
    }

    fn need_points(&self) -> bool {
        false
    }

    fn is_parallelized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upstream {
        base: StageBase,
        raster: Raster,
    }

    impl Stage for Upstream {
        fn name(&self) -> &'static str {
            "rasterize"
        }
        fn base(&self) -> &StageBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut StageBase {
            &mut self.base
        }
        fn clone_stage(&self) -> Box<dyn Stage> {
            unimplemented!()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn produces_raster(&self) -> bool {
            true
        }
        fn raster(&self) -> Option<&Raster> {
            Some(&self.raster)
        }
    }

    #[test]
    fn connect_checks_the_upstream_type() {
        let mut stage = Focal::new();
        // a fresh raster producer is a valid target even before it ran
        let rasterize = super::super::Rasterize::new();
        stage.connect(1, &rasterize).unwrap();
        assert_eq!(Some(1), stage.connection());

        // a stage that can never produce a raster is rejected at parse
        // time, not mid-run
        let sort = super::super::Sort::new();
        assert!(matches!(
            stage.connect(0, &sort),
            Err(Error::InvalidConnection { .. })
        ));
    }

    #[test]
    fn mean_window() {
        let mut raster = Raster::new(0.0, 0.0, 3.0, 3.0, 1.0);
        for cell in 0..9 {
            raster.set_value(cell, cell as f32);
        }
        let upstream = Upstream {
            base: StageBase::default(),
            raster,
        };

        let mut stage = Focal::new();
        stage
            .set_parameters(&serde_json::json!({"size": 3.0, "fun": "mean"}))
            .unwrap();
        stage.process_connected(&upstream).unwrap();
        let result = stage.raster().unwrap();
        // the center cell averages the full 3x3 block
        assert_eq!(4.0, result.value(4));
        // a corner averages its 2x2 neighbourhood
        assert_eq!(2.0, result.value(0));
    }

    #[test]
    fn missing_upstream_raster_is_an_error() {
        let mut stage = Focal::new();
        let no_raster = super::super::Filter::new();
        assert!(stage.process_connected(&no_raster).is_err());
    }
}
