//! ManualStreamer: in-memory frame generator.
//!
//! Replays one or more sequences of data objects. Each pass walks every
//! sequence starting at `start_number`, moving `step_size` frames at a time
//! (a negative step walks backwards). With `looping` the passes never end;
//! otherwise `replays` extra passes follow the first one, and the final
//! frame of the final pass is flagged `last_frame`.

use crate::error::{FlowError, Result};
use crate::pipeline::data::DataObject;
use crate::pipeline::runtime::FrameGenerator;
use std::time::Duration;

pub struct ManualStreamer {
    sequences: Vec<Vec<DataObject>>,
    sleep_time: Duration,
    step_size: i64,
    start_number: usize,
    looping: bool,
    replays: u32,

    // cursor
    sequence: usize,
    position: Option<i64>,
    pass: u32,
    exhausted: bool,
}

impl ManualStreamer {
    pub fn new(frames: Vec<DataObject>) -> Self {
        Self::with_sequences(vec![frames])
    }

    pub fn with_sequences(sequences: Vec<Vec<DataObject>>) -> Self {
        Self {
            sequences,
            sleep_time: Duration::ZERO,
            step_size: 1,
            start_number: 0,
            looping: false,
            replays: 0,
            sequence: 0,
            position: None,
            pass: 0,
            exhausted: false,
        }
    }

    /// Delay between two frames.
    pub fn with_sleep_time(mut self, sleep_time: Duration) -> Self {
        self.sleep_time = sleep_time;
        self
    }

    pub fn with_step_size(mut self, step_size: i64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_start_number(mut self, start_number: usize) -> Self {
        self.start_number = start_number;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Extra passes over the sequences after the first one.
    pub fn with_replays(mut self, replays: u32) -> Self {
        self.replays = replays;
        self
    }

    /// First index of a pass over a sequence of `len` frames. A sequence
    /// shorter than `start_number` yields an out-of-range index and is skipped.
    fn start_position(&self, len: usize) -> i64 {
        if self.step_size > 0 {
            self.start_number as i64
        } else {
            len as i64 - 1 - self.start_number as i64
        }
    }

    fn in_range(position: i64, len: usize) -> bool {
        position >= 0 && (position as usize) < len
    }

    /// Index of the frame after `(sequence, position)` within the current pass.
    fn advance(&self, sequence: usize, position: Option<i64>) -> Option<(usize, i64)> {
        let mut sequence = sequence;
        let mut next = match position {
            Some(p) => p + self.step_size,
            None => self.start_position(self.sequences.get(sequence)?.len()),
        };
        loop {
            let len = self.sequences.get(sequence)?.len();
            if Self::in_range(next, len) {
                return Some((sequence, next));
            }
            sequence += 1;
            next = self.start_position(self.sequences.get(sequence)?.len());
        }
    }

    fn final_pass(&self) -> bool {
        !self.looping && self.pass >= self.replays
    }
}

impl FrameGenerator for ManualStreamer {
    fn next_frame(&mut self) -> Result<Option<DataObject>> {
        if self.step_size == 0 {
            return Err(FlowError::InvalidState(
                "manual streamer step size must be non-zero".to_string(),
            ));
        }
        if self.exhausted {
            return Ok(None);
        }

        let (sequence, position) = match self.advance(self.sequence, self.position) {
            Some(next) => next,
            None => {
                // End of one pass.
                if self.final_pass() {
                    self.exhausted = true;
                    return Ok(None);
                }
                self.pass += 1;
                match self.advance(0, None) {
                    Some(next) => next,
                    None => {
                        self.exhausted = true;
                        return Ok(None);
                    }
                }
            }
        };
        self.sequence = sequence;
        self.position = Some(position);

        let mut frame = self.sequences[sequence][position as usize].clone();
        frame.version = 0;
        frame.last_frame = self.final_pass() && self.advance(sequence, Some(position)).is_none();
        if frame.last_frame {
            self.exhausted = true;
        }
        Ok(Some(frame))
    }

    fn frame_interval(&self) -> Duration {
        self.sleep_time
    }

    fn total_frames(&self) -> Option<u64> {
        if self.looping || self.step_size == 0 {
            return None;
        }
        let step = self.step_size.unsigned_abs();
        let per_pass: u64 = self
            .sequences
            .iter()
            .map(|s| {
                let span = s.len().saturating_sub(self.start_number) as u64;
                span.div_ceil(step)
            })
            .sum();
        Some(per_pass * (u64::from(self.replays) + 1))
    }
}
