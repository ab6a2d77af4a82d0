//! The pipeline: an ordered list of stages driven over chunks.

use crate::stages::Stage;
use crate::{Chunk, Error, FileCollection, Header, Point, PointCloud, Progress, Result};
use log::debug;
use serde_json::{Map, Value};

/// Knobs for a run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Threads available to internally parallel stages.
    pub ncpu: usize,
    /// Chunks processed concurrently, one pipeline clone each.
    pub concurrent_files: usize,
    /// Chatty logging.
    pub verbose: bool,
    /// Draw progress bars.
    pub progress: bool,
}

impl Default for RunOptions {
    fn default() -> RunOptions {
        RunOptions {
            ncpu: 1,
            concurrent_files: 1,
            verbose: false,
            progress: false,
        }
    }
}

/// A parsed pipeline, ready to run over a file collection.
///
/// Whether the run streams points one by one or materializes whole chunks
/// is a property computed from the stages, never a user switch: streaming
/// happens exactly when every stage can stream.
#[derive(Clone, Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    streamable: bool,
    read_payload: bool,
    parallelizable: bool,
    buffer: f64,
    options: RunOptions,
    progress: Progress,
}

impl Pipeline {
    /// Parses a JSON array of stage descriptors.
    ///
    /// The first descriptor must be the `build_catalog` placeholder carrying
    /// the input files; a `reader` descriptor must appear before any stage
    /// that consumes points. Returns the pipeline and the file collection it
    /// will run over.
    pub fn parse(descriptors: &Value, options: &RunOptions) -> Result<(Pipeline, FileCollection)> {
        crate::parser::parse(descriptors, options)
    }

    pub(crate) fn assemble(
        stages: Vec<Box<dyn Stage>>,
        streamable: bool,
        read_payload: bool,
        parallelizable: bool,
        buffer: f64,
        options: RunOptions,
        progress: Progress,
    ) -> Pipeline {
        Pipeline {
            stages,
            streamable,
            read_payload,
            parallelizable,
            buffer,
            options,
            progress,
        }
    }

    /// Will this run push points one at a time, without materializing?
    pub fn is_streamable(&self) -> bool {
        self.streamable
    }

    /// May chunks be processed concurrently?
    pub fn is_parallelizable(&self) -> bool {
        self.parallelizable
    }

    /// The buffer distance negotiated between the user and the stages.
    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    /// The number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Is the pipeline empty?
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The progress channel, e.g. to wire a cancellation signal.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Runs the pipeline over every chunk of the collection.
    ///
    /// Chunks run concurrently when every stage allows it and
    /// `concurrent_files` asks for it; each worker owns a pipeline clone and
    /// per-worker outputs are merged back in chunk order, so the result does
    /// not depend on scheduling. Returns the stages' externally visible
    /// outputs keyed by stage name.
    pub fn run(&mut self, collection: &FileCollection) -> Result<Value> {
        // collection-level stages run once, before any chunk
        for stage in &mut self.stages {
            let name = stage.name();
            stage
                .process_collection(collection)
                .map_err(|error| error.in_stage(name))?;
        }

        let nchunks = collection.number_chunks();
        let mut chunks = Vec::with_capacity(nchunks);
        for index in 0..nchunks {
            chunks.push(collection.get_chunk(index)?);
        }

        let workers = if self.parallelizable {
            self.options.concurrent_files.min(nchunks).max(1)
        } else {
            1
        };

        self.progress.reset();
        self.progress.set_total(nchunks as u64);
        self.progress.set_prefix("Processing");

        if workers <= 1 {
            let last = chunks.len().saturating_sub(1);
            for (index, chunk) in chunks.iter().enumerate() {
                self.run_chunk(chunk, index == last)?;
                self.progress.inc(1);
            }
        } else {
            self.run_parallel(chunks, workers)?;
        }

        self.progress.done();
        Ok(self.outputs())
    }

    fn run_parallel(&mut self, chunks: Vec<Chunk>, workers: usize) -> Result<()> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Chunk>();
        for chunk in chunks {
            sender.send(chunk).expect("the channel is open");
        }
        drop(sender);

        let results: Vec<Result<(Pipeline, Vec<usize>)>> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let receiver = receiver.clone();
                let pipeline = self.clone();
                let progress = self.progress.clone();
                handles.push(scope.spawn(move || {
                    let mut pipeline = pipeline;
                    let mut progress = progress;
                    let mut done = Vec::new();
                    while let Ok(chunk) = receiver.recv() {
                        let id = chunk.id;
                        pipeline.run_chunk(&chunk, false)?;
                        done.push(id);
                        progress.inc(1);
                    }
                    Ok((pipeline, done))
                }));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().expect("a worker panicked"))
                .collect()
        });

        // fold the workers back, lowest first-chunk first, then re-impose
        // input order on every stage's outputs
        let mut finished: Vec<(Pipeline, Vec<usize>)> = Vec::new();
        for result in results {
            finished.push(result?);
        }
        finished.sort_by_key(|(_, done)| done.first().copied().unwrap_or(usize::MAX));

        let mut produced = Vec::new();
        for (worker, done) in &finished {
            for (stage, worker_stage) in self.stages.iter_mut().zip(&worker.stages) {
                stage.merge(worker_stage.as_ref());
            }
            produced.extend(done.iter().copied());
        }

        let mut ranks: Vec<usize> = (0..produced.len()).collect();
        ranks.sort_by_key(|&index| produced[index]);
        let mut order = vec![0; produced.len()];
        for (rank, &index) in ranks.iter().enumerate() {
            order[index] = rank;
        }
        for stage in &mut self.stages {
            stage.sort(&order);
        }

        for stage in &mut self.stages {
            stage.clear(true);
        }
        Ok(())
    }

    /// Runs one chunk through every stage, then releases per-chunk state.
    pub fn run_chunk(&mut self, chunk: &Chunk, last: bool) -> Result<()> {
        let result = self.execute_chunk(chunk);
        for stage in &mut self.stages {
            stage.clear(last && result.is_ok());
        }
        result
    }

    fn execute_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        if self.progress.interrupted() {
            return Err(Error::Interrupted);
        }

        for stage in &mut self.stages {
            let name = stage.name();
            stage
                .set_chunk(chunk)
                .map_err(|error| error.in_stage(name))?;
        }

        if !chunk.process {
            debug!("chunk {} is a buffer-only source, skipped", chunk.id);
            return Ok(());
        }
        // a stage may veto the whole chunk at binding time
        if self.stages.iter().any(|stage| stage.break_pipeline()) {
            debug!("chunk {} skipped by a stage condition", chunk.id);
            return Ok(());
        }

        for stage in &mut self.stages {
            let name = stage.name();
            stage
                .set_input_file_name(&chunk.name)
                .map_err(|error| error.in_stage(name))?;
        }

        let reader = self.stages.iter().position(|stage| stage.name() == "reader");

        // headers travel before any point payload so header-only stages
        // never pull points
        let mut header: Option<Header> = None;
        if let Some(reader) = reader {
            self.stages[reader]
                .process_header(&mut header)
                .map_err(|error| error.in_stage("reader"))?;
        }
        for (index, stage) in self.stages.iter_mut().enumerate() {
            if Some(index) == reader {
                continue;
            }
            let name = stage.name();
            stage
                .process_header(&mut header)
                .map_err(|error| error.in_stage(name))?;
        }

        if !self.read_payload {
            return self.write_all();
        }
        let Some(reader) = reader else {
            return self.write_all();
        };

        if self.streamable {
            self.stream_points(reader)?;
            self.write_all()
        } else {
            self.materialize(reader)
        }
    }

    fn stream_points(&mut self, reader: usize) -> Result<()> {
        let mut point: Option<Point> = None;
        loop {
            if self.progress.interrupted() {
                return Err(Error::Interrupted);
            }
            self.stages[reader]
                .process_point(&mut point)
                .map_err(|error| error.in_stage("reader"))?;
            if point.is_none() {
                return Ok(());
            }
            for index in reader + 1..self.stages.len() {
                let stage = &mut self.stages[index];
                let name = stage.name();
                stage
                    .process_point(&mut point)
                    .map_err(|error| error.in_stage(name))?;
                if stage.break_pipeline() {
                    break;
                }
            }
        }
    }

    fn materialize(&mut self, reader: usize) -> Result<()> {
        let mut cloud: Option<PointCloud> = None;
        self.stages[reader]
            .process_cloud(&mut cloud)
            .map_err(|error| error.in_stage("reader"))?;

        for index in reader + 1..self.stages.len() {
            if self.progress.interrupted() {
                return Err(Error::Interrupted);
            }
            if let Some(connection) = self.stages[index].connection() {
                // connections always point at earlier stages
                let (head, tail) = self.stages.split_at_mut(index);
                let stage = &mut tail[0];
                let name = stage.name();
                stage
                    .process_connected(head[connection].as_ref())
                    .map_err(|error| error.in_stage(name))?;
            } else {
                let stage = &mut self.stages[index];
                let name = stage.name();
                stage
                    .process_cloud(&mut cloud)
                    .map_err(|error| error.in_stage(name))?;
            }
            let stage = &mut self.stages[index];
            if stage.break_pipeline() {
                break;
            }
            let name = stage.name();
            stage.write().map_err(|error| error.in_stage(name))?;
        }
        Ok(())
    }

    fn write_all(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            let name = stage.name();
            stage.write().map_err(|error| error.in_stage(name))?;
        }
        Ok(())
    }

    /// The stages' externally visible outputs, keyed by stage name.
    pub fn outputs(&self) -> Value {
        let mut map = Map::new();
        for stage in &self.stages {
            let output = stage.output();
            if !output.is_null() {
                map.insert(stage.name().to_string(), output);
            }
        }
        Value::Object(map)
    }
}
