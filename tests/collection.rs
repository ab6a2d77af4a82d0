//! File collection behavior over real files on disk.

mod common;

use common::write_tile;
use laspipe::{Crs, Error, FileCollection, PathKind};
use tempfile::TempDir;

fn collection_over(inputs: &[String]) -> FileCollection {
    let mut collection = FileCollection::default();
    collection.read(inputs, false).expect("inputs are readable");
    collection
}

#[test]
fn reads_headers_without_points() {
    let directory = TempDir::new().unwrap();
    let tile = directory.path().join("tile.las");
    write_tile(&tile, 0.0, 0.0, 10);

    let collection = collection_over(&[tile.to_string_lossy().into_owned()]);
    assert_eq!(1, collection.number_files());
    assert_eq!(100, collection.headers()[0].number_of_points);
    assert_eq!(Some(32633), collection.crs().epsg());
    assert_eq!(0.5, collection.xmin());
    assert_eq!(9.5, collection.ymax());
}

#[test]
fn expands_directories_non_recursively() {
    let directory = TempDir::new().unwrap();
    write_tile(&directory.path().join("a.las"), 0.0, 0.0, 5);
    write_tile(&directory.path().join("b.las"), 10.0, 0.0, 5);
    let nested = directory.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    write_tile(&nested.join("c.las"), 20.0, 0.0, 5);

    let collection = collection_over(&[directory.path().to_string_lossy().into_owned()]);
    assert_eq!(2, collection.number_files());
}

#[test]
fn missing_files_are_fatal() {
    let mut collection = FileCollection::default();
    assert!(matches!(
        collection.read(&["nowhere.las".to_string()], false),
        Err(Error::FileNotFound(_))
    ));
    let mut collection = FileCollection::default();
    assert!(matches!(collection.read(&[], false), Err(Error::EmptyInput)));
}

#[test]
fn empty_directories_are_fatal() {
    let directory = TempDir::new().unwrap();
    let mut collection = FileCollection::default();
    assert!(matches!(
        collection.read(&[directory.path().to_string_lossy().into_owned()], false),
        Err(Error::EmptyInput)
    ));
}

#[test]
fn lax_companions_are_skipped() {
    let directory = TempDir::new().unwrap();
    let tile = directory.path().join("tile.las");
    write_tile(&tile, 0.0, 0.0, 5);
    std::fs::write(directory.path().join("tile.lax"), b"not a real index").unwrap();

    assert_eq!(PathKind::Lax, PathKind::of(&directory.path().join("tile.lax")));
    let collection = collection_over(&[directory.path().to_string_lossy().into_owned()]);
    assert_eq!(1, collection.number_files());
    // the sibling index flags the tile as spatially indexed
    assert_eq!(1, collection.number_indexed_files());
}

#[test]
fn buffered_chunks_pull_neighbours() {
    let directory = TempDir::new().unwrap();
    let a = directory.path().join("a.las");
    let b = directory.path().join("b.las");
    write_tile(&a, 0.0, 0.0, 10);
    write_tile(&b, 10.0, 0.0, 10);

    let mut collection = collection_over(&[
        a.to_string_lossy().into_owned(),
        b.to_string_lossy().into_owned(),
    ]);
    collection.set_buffer(2.0);

    let chunk = collection.get_chunk(0).unwrap();
    assert_eq!(vec![a.clone()], chunk.main_files);
    assert_eq!(vec![b.clone()], chunk.neighbour_files);
    assert_eq!("a", chunk.name);

    let chunk = collection.get_chunk(1).unwrap();
    assert_eq!(vec![b], chunk.main_files);
    assert_eq!(vec![a], chunk.neighbour_files);
}

#[test]
fn vpc_round_trip() {
    let directory = TempDir::new().unwrap();
    for (index, x0) in [0.0, 10.0, 20.0].iter().enumerate() {
        write_tile(&directory.path().join(format!("tile_{index}.las")), *x0, 0.0, 10);
    }
    let mut collection = FileCollection::default();
    collection
        .read(&[directory.path().to_string_lossy().into_owned()], false)
        .unwrap();

    let manifest = directory.path().join("collection.vpc");
    collection
        .write_vpc(&manifest, &Crs::from_epsg(32633), false, false)
        .unwrap();

    let mut read_back = FileCollection::default();
    read_back
        .read(&[manifest.to_string_lossy().into_owned()], false)
        .unwrap();
    assert!(read_back.is_source_vpc());
    assert_eq!(collection.number_files(), read_back.number_files());
    assert_eq!(Some(32633), read_back.crs().epsg());
    for (original, read) in collection.headers().iter().zip(read_back.headers()) {
        assert_eq!(original.number_of_points, read.number_of_points);
        assert!((original.bounds.min.x - read.bounds.min.x).abs() < 1e-3);
        assert!((original.bounds.max.y - read.bounds.max.y).abs() < 1e-3);
    }
    // resolved paths point at the same files
    let mut original: Vec<_> = collection.files().to_vec();
    let mut read: Vec<_> = read_back.files().to_vec();
    original.sort();
    read.sort();
    assert_eq!(original, read);
}

#[test]
fn vpc_must_be_the_only_input() {
    let directory = TempDir::new().unwrap();
    let tile = directory.path().join("tile.las");
    write_tile(&tile, 0.0, 0.0, 5);
    let manifest = directory.path().join("collection.vpc");
    std::fs::write(&manifest, r#"{"type": "FeatureCollection", "features": []}"#).unwrap();

    let mut collection = FileCollection::default();
    assert!(matches!(
        collection.read(
            &[
                manifest.to_string_lossy().into_owned(),
                tile.to_string_lossy().into_owned(),
            ],
            false
        ),
        Err(Error::VpcMixedWithOtherInputs)
    ));
}
