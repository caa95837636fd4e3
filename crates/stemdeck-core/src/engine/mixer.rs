//! Per-track mix nodes and the mix graph
//!
//! Each track gets one [`MixNode`]: a fixed trim stage (the track's `gain`)
//! feeding a level stage (volume after mute/solo). Both are stored as atomics
//! so the control thread can retarget them while the render thread reads
//! them lock-free; voices ramp toward the new value over one block.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::song::{Track, TrackId};

/// Live gain state for one track
#[derive(Debug)]
pub struct MixNode {
    trim: AtomicU32,
    level: AtomicU32,
    connected: AtomicBool,
}

impl MixNode {
    pub fn new(trim: f32, level: f32) -> Self {
        Self {
            trim: AtomicU32::new(trim.to_bits()),
            level: AtomicU32::new(level.to_bits()),
            connected: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn trim(&self) -> f32 {
        f32::from_bits(self.trim.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn set_trim(&self, trim: f32) {
        self.trim.store(trim.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_level(&self, level: f32) {
        self.level.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Combined gain reaching the master bus; zero once disconnected
    #[inline]
    pub fn output_gain(&self) -> f32 {
        if !self.is_connected() {
            return 0.0;
        }
        self.trim() * self.level()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Detach from the master bus; voices still holding the node go silent
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// Effective level-stage value for one track
///
/// Muted tracks are silent. When any track is soloed, every non-soloed track
/// is silent too. Otherwise the fader volume passes through. The trim stage
/// is not involved.
#[inline]
pub fn effective_level(volume: f32, is_muted: bool, is_soloed: bool, any_soloed: bool) -> f32 {
    if is_muted || (any_soloed && !is_soloed) {
        0.0
    } else {
        volume
    }
}

/// The set of mix nodes for the active track set
#[derive(Default)]
pub struct MixGraph {
    nodes: Vec<(TrackId, Arc<MixNode>)>,
}

impl MixGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all nodes with fresh ones for `tracks`
    ///
    /// Previous nodes are disconnected first so a voice still holding one
    /// can never reach the master bus again.
    pub fn rebuild(&mut self, tracks: &[Track]) {
        self.teardown();
        self.nodes = tracks
            .iter()
            .map(|t| (t.id.clone(), Arc::new(MixNode::new(t.gain, 0.0))))
            .collect();
        self.apply(tracks);
        log::debug!("Mix graph rebuilt with {} nodes", self.nodes.len());
    }

    /// Disconnect and drop every node
    pub fn teardown(&mut self) {
        for (_, node) in self.nodes.drain(..) {
            node.disconnect();
        }
    }

    /// Push the mixer state of `tracks` into the live nodes
    ///
    /// Tracks without a node are ignored.
    pub fn apply(&self, tracks: &[Track]) {
        let any_soloed = tracks.iter().any(|t| t.is_soloed);
        for track in tracks {
            if let Some(node) = self.node(&track.id) {
                node.set_trim(track.gain);
                node.set_level(effective_level(track.volume, track.is_muted, track.is_soloed, any_soloed));
            }
        }
    }

    pub fn node(&self, id: &TrackId) -> Option<&Arc<MixNode>> {
        self.nodes.iter().find(|(t, _)| t == id).map(|(_, n)| n)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks() -> Vec<Track> {
        vec![
            Track::new("drums", "Drums", "d.wav").with_volume(0.9).with_gain(0.5),
            Track::new("bass", "Bass", "b.wav").with_volume(0.7).with_gain(1.0),
            Track::new("keys", "Keys", "k.wav").with_volume(0.4).with_gain(0.8),
        ]
    }

    #[test]
    fn test_effective_level_rules() {
        assert_eq!(effective_level(0.8, false, false, false), 0.8);
        assert_eq!(effective_level(0.8, true, false, false), 0.0);
        assert_eq!(effective_level(0.8, false, false, true), 0.0);
        assert_eq!(effective_level(0.8, false, true, true), 0.8);
        assert_eq!(effective_level(0.8, true, true, true), 0.0);
    }

    #[test]
    fn test_solo_silences_every_other_track() {
        let mut tracks = tracks();
        let mut graph = MixGraph::new();
        graph.rebuild(&tracks);

        tracks[1].is_soloed = true;
        tracks[2].is_muted = false;
        tracks[0].volume = 1.0;
        graph.apply(&tracks);

        assert_eq!(graph.node(&TrackId::from("drums")).unwrap().level(), 0.0);
        assert_eq!(graph.node(&TrackId::from("bass")).unwrap().level(), 0.7);
        assert_eq!(graph.node(&TrackId::from("keys")).unwrap().level(), 0.0);
    }

    #[test]
    fn test_mute_leaves_trim_untouched() {
        let mut tracks = tracks();
        let mut graph = MixGraph::new();
        graph.rebuild(&tracks);

        tracks[0].is_muted = true;
        graph.apply(&tracks);
        let node = graph.node(&TrackId::from("drums")).unwrap();
        assert_eq!(node.level(), 0.0);
        assert_eq!(node.trim(), 0.5);
    }

    #[test]
    fn test_rebuild_disconnects_old_nodes() {
        let tracks = tracks();
        let mut graph = MixGraph::new();
        graph.rebuild(&tracks);
        let old = Arc::clone(graph.node(&TrackId::from("keys")).unwrap());
        assert!((old.output_gain() - 0.32).abs() < 1e-6);

        graph.rebuild(&tracks[..1]);
        assert!(!old.is_connected());
        assert_eq!(old.output_gain(), 0.0);
        assert_eq!(graph.len(), 1);
        assert!(graph.node(&TrackId::from("keys")).is_none());
    }
}
