//! Parses a JSON array of stage descriptors into a pipeline.

use crate::pipeline::{Pipeline, RunOptions};
use crate::stages::{
    AddAttribute, AddRgb, EditAttribute, Filter, Focal, Info, Rasterize, Reader, RemoveAttribute,
    SamplingPixel, SamplingVoxel, SetCrs, Sort, Stage, StopIf, Summary, WriteIndex, WriteLas,
    WritePcd, WriteVpc,
};
use crate::{Bounds, Error, FileCollection, PointFilter, Progress, Result, Signature};
use serde_json::Value;
use std::path::Path;

fn numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        Value::Null => Vec::new(),
        other => other.as_f64().into_iter().collect(),
    }
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::Null => Vec::new(),
        other => other.as_str().map(str::to_string).into_iter().collect(),
    }
}

fn factory(name: &str) -> Option<Box<dyn Stage>> {
    let stage: Box<dyn Stage> = match name {
        "add_attribute" => Box::new(AddAttribute::new()),
        "add_rgb" => Box::new(AddRgb::new()),
        "edit_attribute" => Box::new(EditAttribute::new()),
        "filter" => Box::new(Filter::new()),
        "focal" => Box::new(Focal::new()),
        "info" => Box::new(Info::new()),
        "rasterize" => Box::new(Rasterize::new()),
        "remove_attribute" => Box::new(RemoveAttribute::new()),
        "sampling_pixel" => Box::new(SamplingPixel::new()),
        "sampling_voxel" => Box::new(SamplingVoxel::new()),
        "set_crs" => Box::new(SetCrs::new()),
        "sort" => Box::new(Sort::new()),
        "stop_if" => Box::new(StopIf::new()),
        "summarise" => Box::new(Summary::new()),
        "write_las" => Box::new(WriteLas::new()),
        "write_lax" => Box::new(WriteIndex::new()),
        "write_pcd" => Box::new(WritePcd::new()),
        "write_vpc" => Box::new(WriteVpc::new()),
        _ => return None,
    };
    Some(stage)
}

fn resolve_connection(stages: &[Box<dyn Stage>], uid: &str) -> Result<usize> {
    stages
        .iter()
        .position(|stage| stage.uid() == uid)
        .ok_or_else(|| Error::ConnectionNotFound(uid.to_string()))
}

pub(crate) fn parse(
    descriptors: &Value,
    options: &RunOptions,
) -> Result<(Pipeline, FileCollection)> {
    let Some(items) = descriptors.as_array() else {
        return Err(Error::UnknownStage(
            "the pipeline description must be an array of stages".to_string(),
        ));
    };

    let progress = Progress::new(options.progress);
    let mut collection = FileCollection::default();
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    let mut catalog_built = false;
    let mut reader_seen = false;
    let mut indexer_present = false;
    let mut buffer = 0.0_f64;
    let mut chunk_size = 0.0_f64;
    let mut extent = Bounds::default();

    for descriptor in items {
        let name = descriptor
            .get("algoname")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnknownStage("descriptor without algoname".to_string()))?;
        let uid = descriptor
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or("xxx-xxx");

        match name {
            // the placeholder carrying the run inputs; adds no stage
            "build_catalog" => {
                buffer = descriptor.get("buffer").and_then(Value::as_f64).unwrap_or(0.0);
                chunk_size = descriptor.get("chunk").and_then(Value::as_f64).unwrap_or(0.0);
                let kind = descriptor
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("files");
                if kind != "files" {
                    return Err(Error::UnknownStage(format!(
                        "unsupported input source type: {kind}"
                    )));
                }
                let files = strings(descriptor.get("files").unwrap_or(&Value::Null));
                collection.read(&files, options.progress)?;
                if let Some(mask) = descriptor.get("noprocess") {
                    let mask: Vec<bool> = mask
                        .as_array()
                        .map(|items| items.iter().filter_map(Value::as_bool).collect())
                        .unwrap_or_default();
                    collection.set_noprocess(&mask)?;
                }
                extent = Bounds::new(
                    collection.xmin(),
                    collection.ymin(),
                    0.0,
                    collection.xmax(),
                    collection.ymax(),
                    0.0,
                );
                catalog_built = true;
                continue;
            }
            "reader" | "reader_las" => {
                if reader_seen {
                    return Err(Error::DuplicateReader);
                }
                reader_seen = true;
                if !catalog_built {
                    return Err(Error::EmptyInput);
                }
                stages.push(Box::new(Reader::new(collection.signature())));

                // queries carried by the reader descriptor; the coverage
                // extent shrinks to the queried region
                let mut queried = Bounds::default();
                let xcenter = numbers(descriptor.get("xcenter").unwrap_or(&Value::Null));
                if !xcenter.is_empty() {
                    let ycenter = numbers(descriptor.get("ycenter").unwrap_or(&Value::Null));
                    let radius = numbers(descriptor.get("radius").unwrap_or(&Value::Null));
                    for ((&x, &y), &r) in xcenter.iter().zip(&ycenter).zip(&radius) {
                        collection.add_query_circle(x, y, r);
                        queried.grow(x - r, y - r, 0.0);
                        queried.grow(x + r, y + r, 0.0);
                    }
                }
                let xmin = numbers(descriptor.get("xmin").unwrap_or(&Value::Null));
                if !xmin.is_empty() {
                    let ymin = numbers(descriptor.get("ymin").unwrap_or(&Value::Null));
                    let xmax = numbers(descriptor.get("xmax").unwrap_or(&Value::Null));
                    let ymax = numbers(descriptor.get("ymax").unwrap_or(&Value::Null));
                    for i in 0..xmin.len() {
                        collection.add_query_rectangle(xmin[i], ymin[i], xmax[i], ymax[i]);
                        queried.grow(xmin[i], ymin[i], 0.0);
                        queried.grow(xmax[i], ymax[i], 0.0);
                    }
                }
                if !queried.is_empty() {
                    queried.clip_xy(&extent);
                    extent = queried;
                }
            }
            "write_lax" => {
                indexer_present = true;
                stages.push(Box::new(WriteIndex::new()));
            }
            other => match factory(other) {
                Some(stage) => stages.push(stage),
                None => return Err(Error::UnknownStage(other.to_string())),
            },
        }

        // wire the stage that was just created
        let stage = stages.last_mut().unwrap();
        stage.set_uid(uid);
        stage.set_ncpu(options.ncpu);
        stage.set_verbose(options.verbose);
        stage.set_extent(&extent);

        for key in ["connect", "connect1", "connect2"] {
            if let Some(target) = descriptor.get(key).and_then(Value::as_str) {
                let index = resolve_connection(&stages[..stages.len() - 1], target)?;
                let split = stages.len() - 1;
                let (head, tail) = stages.split_at_mut(split);
                tail[0].connect(index, head[index].as_ref())?;
            }
        }

        let stage = stages.last_mut().unwrap();
        stage
            .set_parameters(descriptor)
            .map_err(|error| error.in_stage(name))?;

        if catalog_built && stage.need_points() && !reader_seen {
            return Err(Error::ReaderMissingBefore(name.to_string()));
        }
    }

    if !catalog_built {
        return Err(Error::EmptyInput);
    }
    let read_payload = stages.iter().any(|stage| stage.need_points());
    if read_payload && !reader_seen {
        return Err(Error::MissingReader);
    }

    // the pipeline now knows the buffer it needs
    let need_buffer = stages
        .iter()
        .map(|stage| stage.need_buffer())
        .fold(0.0, f64::max);
    buffer = buffer.max(need_buffer);
    collection.set_buffer(buffer);
    collection.set_chunk_size(chunk_size)?;

    // second pass: filters, CRS propagation and output files, only now
    // that the run is certain to happen
    let mut current_crs = collection.crs().clone();
    let mut stage_index = 0;
    for descriptor in items {
        let name = descriptor.get("algoname").and_then(Value::as_str).unwrap_or("");
        if name == "build_catalog" {
            continue;
        }
        let stage = &mut stages[stage_index];
        stage_index += 1;

        let expressions = strings(descriptor.get("filter").unwrap_or(&Value::Null));
        stage.set_filter(PointFilter::from_expressions(&expressions)?);
        stage.set_progress(progress.clone());

        stage.set_crs(&current_crs);
        current_crs = stage.crs();

        let output = descriptor
            .get("output")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !output.is_empty() {
            if collection.file_exists(Path::new(output)) {
                return Err(Error::OutputIsInput(output.into()));
            }
            stage
                .set_output_file(output)
                .map_err(|error| error.in_stage(name))?;
        }
    }

    // index unindexed collections on the fly, before anything reads points
    if !collection.check_spatial_index()
        && !indexer_present
        && collection.signature() == Signature::Lasf
    {
        let mut indexer = WriteIndex::new();
        indexer.set_progress(progress.clone());
        stages.insert(0, Box::new(indexer));
        collection.set_all_indexed();
        // the prepend shifted every pipeline index by one
        for index in 1..stages.len() {
            if let Some(connection) = stages[index].connection() {
                let (head, tail) = stages.split_at_mut(index);
                tail[0].connect(connection + 1, head[connection + 1].as_ref())?;
            }
        }
    }

    let streamable = stages.iter().all(|stage| stage.is_streamable());
    let parallelizable = stages.iter().all(|stage| stage.is_parallelizable());

    let pipeline = Pipeline::assemble(
        stages,
        streamable,
        read_payload,
        parallelizable,
        buffer,
        options.clone(),
        progress,
    );
    Ok((pipeline, collection))
}
