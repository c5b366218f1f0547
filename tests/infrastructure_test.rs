//! Test to verify test infrastructure works correctly

mod common;

use common::builders::RecorderBuilder;
use common::mock_helpers::{numbered_streamer, scalar_frames};
use frameflow::pipeline::FrameGenerator;
use std::time::Duration;

#[test]
fn test_infrastructure_setup() {
    let node = RecorderBuilder::new("recorder").inputs(3).build();
    assert_eq!(node.name(), "recorder");
    assert_eq!(node.ports().len(), 3);

    let frames = scalar_frames(4);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[3].as_scalar(), Some(3.0));

    let streamer = numbered_streamer(4, Duration::from_millis(5));
    assert_eq!(streamer.frame_interval(), Duration::from_millis(5));
    assert_eq!(streamer.total_frames(), Some(4));
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
