//! End-to-end pipeline runs over synthetic collections.

mod common;

use common::write_tile;
use laspipe::{Error, Pipeline, RunOptions};
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;

fn two_tiles(directory: &Path) -> Vec<String> {
    let a = directory.join("a.las");
    let b = directory.join("b.las");
    write_tile(&a, 0.0, 0.0, 10);
    write_tile(&b, 10.0, 0.0, 10);
    vec![
        a.to_string_lossy().into_owned(),
        b.to_string_lossy().into_owned(),
    ]
}

#[test]
fn streaming_passthrough() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());
    let out = directory.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "write_las", "output": out.join("*.las").to_string_lossy()},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    assert!(pipeline.is_streamable());

    let outputs = pipeline.run(&collection).unwrap();
    let written = outputs["write_las"].as_array().unwrap();
    assert_eq!(2, written.len());
    for (stem, path) in ["a", "b"].iter().zip(written) {
        let path = Path::new(path.as_str().unwrap());
        assert_eq!(out.join(format!("{stem}.las")), path);
        let header = laspipe::io::las::read_header(path).unwrap();
        assert_eq!(100, header.number_of_points);
    }
}

#[test]
fn filter_then_write() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());
    let out = directory.path().join("ground_*.las");

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "filter", "filter": "z < 5"},
        {"algoname": "write_las", "output": out.to_string_lossy()},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    pipeline.run(&collection).unwrap();

    // the filter keeps z below 5; rows 0..5 of each tile survive
    let header =
        laspipe::io::las::read_header(&directory.path().join("ground_a.las")).unwrap();
    assert_eq!(50, header.number_of_points);
    assert!(header.bounds.max.z < 5.0);
}

#[test]
fn sort_forces_materialization() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());
    let out = directory.path().join("sorted_*.las");

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "sort"},
        {"algoname": "write_las", "output": out.to_string_lossy()},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    assert!(!pipeline.is_streamable());
    pipeline.run(&collection).unwrap();
    let header =
        laspipe::io::las::read_header(&directory.path().join("sorted_a.las")).unwrap();
    assert_eq!(100, header.number_of_points);
}

#[test]
fn merged_output_spans_all_chunks() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());
    let out = directory.path().join("merged.las");

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "write_las", "output": out.to_string_lossy()},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    let outputs = pipeline.run(&collection).unwrap();

    assert_eq!(
        Value::String(out.to_string_lossy().into_owned()),
        outputs["write_las"]
    );
    let header = laspipe::io::las::read_header(&out).unwrap();
    assert_eq!(200, header.number_of_points);
}

#[test]
fn parallel_runs_are_deterministic() {
    let directory = TempDir::new().unwrap();
    let mut files = Vec::new();
    for index in 0..6 {
        let path = directory.path().join(format!("tile_{index}.las"));
        write_tile(&path, f64::from(index) * 10.0, 0.0, 8);
        files.push(path.to_string_lossy().into_owned());
    }

    let run = |workers: usize, tag: &str| -> Value {
        let out = directory.path().join(format!("{tag}_*.las"));
        let descriptors = json!([
            {"algoname": "build_catalog", "files": files.clone()},
            {"algoname": "reader"},
            {"algoname": "summarise"},
            {"algoname": "write_las", "output": out.to_string_lossy()},
        ]);
        let options = RunOptions {
            concurrent_files: workers,
            ..Default::default()
        };
        let (mut pipeline, collection) = Pipeline::parse(&descriptors, &options).unwrap();
        let mut outputs = pipeline.run(&collection).unwrap();
        // strip the tag so both runs are comparable
        let written: Vec<String> = outputs["write_las"]
            .as_array()
            .unwrap()
            .iter()
            .map(|path| path.as_str().unwrap().replace(tag, "run"))
            .collect();
        outputs["write_las"] = json!(written);
        outputs
    };

    let serial = run(1, "serial");
    let parallel = run(4, "parallel");
    // file lists come out in chunk order and the merged statistics agree
    assert_eq!(serial, parallel);
}

#[test]
fn chunk_size_runs_on_a_grid() {
    let directory = TempDir::new().unwrap();
    let tile = directory.path().join("tile.las");
    write_tile(&tile, 0.0, 0.0, 20);

    // a chunk size that puts no grid line on a point column, so every
    // point belongs to exactly one cell
    let descriptors = json!([
        {
            "algoname": "build_catalog",
            "files": [tile.to_string_lossy()],
            "chunk": 9.7
        },
        {"algoname": "reader"},
        {"algoname": "summarise"},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    assert_eq!(4, collection.number_chunks());
    let outputs = pipeline.run(&collection).unwrap();
    assert_eq!(400, outputs["summarise"]["npoints"].as_u64().unwrap());
}

#[test]
fn queries_from_the_reader_descriptor() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {
            "algoname": "reader",
            "xcenter": 10.0, "ycenter": 5.0, "radius": 3.0
        },
        {"algoname": "summarise"},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    assert_eq!(1, collection.number_chunks());
    let chunk = collection.get_chunk(0).unwrap();
    assert_eq!(2, chunk.main_files.len());

    let outputs = pipeline.run(&collection).unwrap();
    // every counted point is inside the circle
    let counted = outputs["summarise"]["npoints"].as_u64().unwrap();
    assert!(counted > 0 && counted < 40, "counted {counted}");
}

#[test]
fn stop_if_skips_chunks() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "stop_if", "condition": "chunk_id_below", "index": 1},
        {"algoname": "reader"},
        {"algoname": "summarise"},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    let outputs = pipeline.run(&collection).unwrap();
    // only the second tile was processed
    assert_eq!(100, outputs["summarise"]["npoints"].as_u64().unwrap());
}

#[test]
fn rasterize_with_focal_connection() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "rasterize", "uid": "chm", "res": 2.0, "operation": "max"},
        {"algoname": "focal", "connect": "chm", "size": 6.0, "fun": "mean"},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    // the focal window asks for a buffer; chunk planning honors it
    assert!(pipeline.buffer() >= 3.0);
    pipeline.run(&collection).unwrap();
}

#[test]
fn parse_errors() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());

    let unknown = json!([
        {"algoname": "build_catalog", "files": files.clone()},
        {"algoname": "reader"},
        {"algoname": "classify_with_magic"},
    ]);
    assert!(matches!(
        Pipeline::parse(&unknown, &RunOptions::default()),
        Err(Error::UnknownStage(_))
    ));

    let no_reader = json!([
        {"algoname": "build_catalog", "files": files.clone()},
        {"algoname": "filter", "filter": "z > 0"},
    ]);
    assert!(matches!(
        Pipeline::parse(&no_reader, &RunOptions::default()),
        Err(Error::ReaderMissingBefore(_))
    ));

    let two_readers = json!([
        {"algoname": "build_catalog", "files": files.clone()},
        {"algoname": "reader"},
        {"algoname": "reader"},
    ]);
    assert!(matches!(
        Pipeline::parse(&two_readers, &RunOptions::default()),
        Err(Error::DuplicateReader)
    ));

    // connecting a raster consumer to a non-raster stage fails at parse
    // time, before any chunk runs
    let bad_connection = json!([
        {"algoname": "build_catalog", "files": files.clone()},
        {"algoname": "reader"},
        {"algoname": "sort", "uid": "srt"},
        {"algoname": "focal", "connect": "srt"},
    ]);
    assert!(matches!(
        Pipeline::parse(&bad_connection, &RunOptions::default()),
        Err(Error::InvalidConnection { .. })
    ));

    let output_is_input = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "write_las", "output": files[0]},
    ]);
    assert!(matches!(
        Pipeline::parse(&output_is_input, &RunOptions::default()),
        Err(Error::OutputIsInput(_))
    ));
}

#[test]
fn header_only_pipelines_never_pull_points() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "reader"},
        {"algoname": "info"},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    assert!(pipeline.is_streamable());
    pipeline.run(&collection).unwrap();
}

#[test]
fn vpc_written_by_a_pipeline() {
    let directory = TempDir::new().unwrap();
    let files = two_tiles(directory.path());
    let manifest = directory.path().join("collection.vpc");

    let descriptors = json!([
        {"algoname": "build_catalog", "files": files},
        {"algoname": "write_vpc", "output": manifest.to_string_lossy()},
    ]);
    let (mut pipeline, collection) =
        Pipeline::parse(&descriptors, &RunOptions::default()).unwrap();
    let outputs = pipeline.run(&collection).unwrap();
    assert!(manifest.exists());
    assert_eq!(
        Value::String(manifest.to_string_lossy().into_owned()),
        outputs["write_vpc"]
    );
}
