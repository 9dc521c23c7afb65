use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{MotionError, Result, SourceId, TransportError};

/// Complete set of positions for one tick, keyed by [`SourceId`].
///
/// Rebuilt from scratch after every tick; ids with no live source are
/// simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionFrame {
    pub tick: u64,
    pub time: f64,
    positions: BTreeMap<SourceId, DVec3>,
}

impl PositionFrame {
    pub(crate) fn rebuild(&mut self, tick: u64, time: f64) {
        self.tick = tick;
        self.time = time;
        self.positions.clear();
    }

    pub(crate) fn write(&mut self, id: SourceId, position: DVec3) {
        self.positions.insert(id, position);
    }

    pub fn get(&self, id: SourceId) -> Option<DVec3> {
        self.positions.get(&id).copied()
    }

    /// Live sources in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (SourceId, DVec3)> + '_ {
        self.positions.iter().map(|(id, position)| (*id, *position))
    }

    /// Number of live sources in the frame.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Outbound link to the spatialization renderer.
///
/// `publish` is called exactly once per tick with the complete frame.
/// Errors are reported back but never retried: the next tick carries a
/// fresher frame anyway.
pub trait Transport {
    fn publish(&mut self, frame: &PositionFrame) -> std::result::Result<(), TransportError>;
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn publish(&mut self, _frame: &PositionFrame) -> std::result::Result<(), TransportError> {
        Ok(())
    }
}

/// Keeps published frames in memory, shared with any number of readers.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    frames: Arc<Mutex<Vec<PositionFrame>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every frame published so far.
    pub fn frames(&self) -> Result<Vec<PositionFrame>> {
        Ok(self.lock()?.clone())
    }

    pub fn last(&self) -> Result<Option<PositionFrame>> {
        Ok(self.lock()?.last().cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<PositionFrame>>> {
        self.frames
            .lock()
            .map_err(|_| MotionError::msg("recorded frames have been poisoned"))
    }
}

impl Transport for RecordingTransport {
    fn publish(&mut self, frame: &PositionFrame) -> std::result::Result<(), TransportError> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| TransportError::Rejected("recorder poisoned".to_string()))?;
        frames.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_exposes_only_written_ids() {
        let mut frame = PositionFrame::default();
        frame.rebuild(3, 0.05);
        frame.write(SourceId(u32::MAX), DVec3::Z);
        frame.write(SourceId(2), DVec3::Y);
        frame.write(SourceId(0), DVec3::X);

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.get(SourceId(2)), Some(DVec3::Y));
        assert_eq!(frame.get(SourceId(1)), None);
        assert_eq!(
            frame.iter().collect::<Vec<_>>(),
            vec![
                (SourceId(0), DVec3::X),
                (SourceId(2), DVec3::Y),
                (SourceId(u32::MAX), DVec3::Z),
            ]
        );

        frame.rebuild(4, 0.1);
        assert!(frame.is_empty());
    }

    #[test]
    fn frame_serializes_ids_as_keys() {
        let mut frame = PositionFrame::default();
        frame.rebuild(1, 0.5);
        frame.write(SourceId(7), DVec3::new(1.0, 2.0, 3.0));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""7":[1.0,2.0,3.0]"#));
        assert_eq!(serde_json::from_str::<PositionFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn recorder_clones_share_frames() {
        let recorder = RecordingTransport::new();
        let mut sender = recorder.clone();
        sender.publish(&PositionFrame::default()).unwrap();
        sender.publish(&PositionFrame::default()).unwrap();
        assert_eq!(recorder.len().unwrap(), 2);
        assert!(recorder.last().unwrap().is_some());
    }
}
