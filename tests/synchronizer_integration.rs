//! Integration tests for the synchronizer nodes
//!
//! These tests validate:
//! - FramerateSynchronizer pairing streams running at different rates
//! - Priority inputs driving synchronization cycles
//! - PipelineSynchronizer exposing the newest frame of each input

mod common;

use common::builders::RecorderBuilder;
use common::mock_helpers::{numbered_streamer, scalar_frames};
use frameflow::pipeline::{
    DataObject, FramerateSynchronizer, ManualStreamer, PipelineSynchronizer, StaticSource,
    StreamSource,
};
use frameflow::{ExecutionContext, Pipeline, StreamingMode};
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn test_framerate_sync_never_repeats_a_pair() {
    let recorder = RecorderBuilder::new("pairs").inputs(2);
    let seen = recorder.seen();

    let ctx = ExecutionContext::default();
    let mut pipeline = Pipeline::new(ctx.clone());
    let fast = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            numbered_streamer(40, Duration::from_millis(100)),
        ))
        .unwrap();
    let slow = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            numbered_streamer(20, Duration::from_millis(200)),
        ))
        .unwrap();
    let sync = pipeline.add_node(FramerateSynchronizer::new(2, None)).unwrap();
    let sink = pipeline.add_node(recorder.build()).unwrap();
    pipeline.connect(fast, 0, sync, 0).unwrap();
    pipeline.connect(slow, 0, sync, 1).unwrap();
    pipeline.connect(sync, 0, sink, 0).unwrap();
    pipeline.connect(sync, 1, sink, 1).unwrap();

    for _ in 0..10 {
        assert!(pipeline.update(sink).unwrap());
    }

    let pairs: Vec<(f64, f64)> = seen
        .lock()
        .iter()
        .map(|frames| {
            (
                frames[0].as_scalar().unwrap(),
                frames[1].as_scalar().unwrap(),
            )
        })
        .collect();
    assert_eq!(pairs.len(), 10);
    for window in pairs.windows(2) {
        assert_ne!(window[0], window[1], "pair repeated: {:?}", pairs);
        assert!(window[1].0 >= window[0].0);
        assert!(window[1].1 >= window[0].1);
    }
    // The slow stream repeats its frame while the fast one moves on.
    assert!(pairs.windows(2).any(|w| w[0].1 == w[1].1));

    pipeline.stop("test finished");
}

#[test]
#[serial]
fn test_priority_input_drives_cycles() {
    let recorder = RecorderBuilder::new("pairs").inputs(2);
    let seen = recorder.seen();

    let ctx = ExecutionContext::default();
    let mut pipeline = Pipeline::new(ctx.clone());
    let fast = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            numbered_streamer(100, Duration::from_millis(10)),
        ))
        .unwrap();
    let slow = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            numbered_streamer(20, Duration::from_millis(40)),
        ))
        .unwrap();
    let sync = pipeline
        .add_node(FramerateSynchronizer::new(2, Some(1)))
        .unwrap();
    let sink = pipeline.add_node(recorder.build()).unwrap();
    pipeline.connect(fast, 0, sync, 0).unwrap();
    pipeline.connect(slow, 0, sync, 1).unwrap();
    pipeline.connect(sync, 0, sink, 0).unwrap();
    pipeline.connect(sync, 1, sink, 1).unwrap();

    for _ in 0..5 {
        assert!(pipeline.update(sink).unwrap());
    }

    let slow_ids: Vec<f64> = seen
        .lock()
        .iter()
        .map(|frames| frames[1].as_scalar().unwrap())
        .collect();
    // Every cycle carries a new frame of the priority input.
    for window in slow_ids.windows(2) {
        assert!(window[1] > window[0], "priority frame repeated: {:?}", slow_ids);
    }

    pipeline.stop("test finished");
}

#[test]
#[serial]
fn test_framerate_sync_stops_when_inputs_end() {
    let ctx = ExecutionContext::default();
    let mut pipeline = Pipeline::new(ctx.clone());
    let a = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            ManualStreamer::new(scalar_frames(3)),
        ))
        .unwrap();
    let b = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::NewestFrameOnly,
            ManualStreamer::new(scalar_frames(2)),
        ))
        .unwrap();
    let sync = pipeline.add_node(FramerateSynchronizer::new(2, None)).unwrap();
    pipeline.connect(a, 0, sync, 0).unwrap();
    pipeline.connect(b, 0, sync, 1).unwrap();

    // Once both streams have ended the synchronizer returns without blocking.
    for _ in 0..10 {
        pipeline.update(sync).unwrap();
    }
    let out = pipeline.subscribe(sync, 0).unwrap();
    assert!(out.latest().is_some());
}

#[test]
fn test_pipeline_sync_shows_newest_frames() {
    let ctx = ExecutionContext::default();
    let mut pipeline = Pipeline::new(ctx.clone());
    let stream = pipeline
        .add_node(StreamSource::new(
            &ctx,
            StreamingMode::ProcessAllFrames,
            ManualStreamer::new(scalar_frames(6)),
        ))
        .unwrap();
    let fixed = pipeline
        .add_node(StaticSource::new(DataObject::scalar(42.0)))
        .unwrap();
    let sync = pipeline.add_node(PipelineSynchronizer::new(2)).unwrap();
    pipeline.connect(stream, 0, sync, 0).unwrap();
    pipeline.connect(fixed, 0, sync, 1).unwrap();

    let buffer = pipeline.stream(stream, 0).unwrap();
    pipeline.update(stream).unwrap();
    assert!(common::wait_until(|| buffer.is_ended()));

    assert!(pipeline.update(sync).unwrap());
    let streamed = pipeline.subscribe(sync, 0).unwrap();
    let constant = pipeline.subscribe(sync, 1).unwrap();
    assert_eq!(streamed.latest().and_then(|f| f.as_scalar()), Some(5.0));
    assert_eq!(constant.latest().and_then(|f| f.as_scalar()), Some(42.0));

    // Nothing new: outputs keep their frames and the node still runs.
    assert!(pipeline.update(sync).unwrap());
    assert_eq!(streamed.latest().and_then(|f| f.as_scalar()), Some(5.0));
}
