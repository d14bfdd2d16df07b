//! Minimal track layout builder.
//!
//! Lays out straight segments on the linear axis, discretises each one into
//! alternating bin-edge / bin-center nodes and joins segment ends at
//! junctions. Produces the [`TrackGraph`] together with the interior mask
//! over all place bins, including the exterior gap bins between segments.

use serde::{Deserialize, Serialize};

use crate::error::{LikelihoodError, Result};
use crate::track_graph::{NodeId, TrackGraph, TrackNode};

/// A straight piece of track on the linear axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackSegment {
    /// Linear position of the segment start
    pub start: f64,

    /// Physical length of the segment
    pub length: f64,
}

/// Which end of a segment a junction attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentEnd {
    Start(usize),
    End(usize),
}

/// Output of [`TrackLayout::build`].
#[derive(Debug, Clone)]
pub struct BuiltTrack {
    pub graph: TrackGraph,

    /// One flag per place bin over the whole linear axis; `true` for bins
    /// covered by a segment, in linear-position order.
    pub is_interior: Vec<bool>,
}

/// Builder for branching tracks made of straight segments.
#[derive(Debug, Clone)]
pub struct TrackLayout {
    bin_size: f64,
    segments: Vec<TrackSegment>,
    junctions: Vec<(SegmentEnd, SegmentEnd)>,
}

impl TrackLayout {
    pub fn new(bin_size: f64) -> Self {
        Self {
            bin_size,
            segments: Vec::new(),
            junctions: Vec::new(),
        }
    }

    /// Adds a segment; its index doubles as its edge id.
    pub fn add_segment(&mut self, start: f64, length: f64) -> usize {
        self.segments.push(TrackSegment { start, length });
        self.segments.len() - 1
    }

    /// Physically joins two segment ends (zero-length connection).
    pub fn connect(&mut self, a: SegmentEnd, b: SegmentEnd) -> &mut Self {
        self.junctions.push((a, b));
        self
    }

    /// A single straight track `[0, length]`.
    pub fn linear(length: f64, bin_size: f64) -> Self {
        let mut layout = Self::new(bin_size);
        layout.add_segment(0.0, length);
        layout
    }

    /// A W-shaped maze: center arm, two connectors and two outer arms,
    /// unrolled onto the linear axis with `spacing` between segments.
    pub fn w_track(arm_length: f64, connector_length: f64, spacing: f64, bin_size: f64) -> Self {
        let mut layout = Self::new(bin_size);
        let mut cursor = 0.0;
        let mut next = |layout: &mut Self, length: f64| {
            let id = layout.add_segment(cursor, length);
            cursor += length + spacing;
            id
        };
        let center = next(&mut layout, arm_length);
        let left_connector = next(&mut layout, connector_length);
        let left_arm = next(&mut layout, arm_length);
        let right_connector = next(&mut layout, connector_length);
        let right_arm = next(&mut layout, arm_length);

        layout
            .connect(SegmentEnd::End(center), SegmentEnd::Start(left_connector))
            .connect(SegmentEnd::End(center), SegmentEnd::Start(right_connector))
            .connect(SegmentEnd::End(left_connector), SegmentEnd::Start(left_arm))
            .connect(SegmentEnd::End(right_connector), SegmentEnd::Start(right_arm));
        layout
    }

    pub fn segments(&self) -> &[TrackSegment] {
        &self.segments
    }

    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Builds the graph and the interior mask.
    pub fn build(&self) -> Result<BuiltTrack> {
        if !(self.bin_size.is_finite() && self.bin_size > 0.0) {
            return Err(LikelihoodError::config(format!(
                "bin size must be positive, got {}",
                self.bin_size
            )));
        }

        let mut graph = TrackGraph::new();
        let mut ends: Vec<(NodeId, NodeId)> = Vec::with_capacity(self.segments.len());
        let mut bins_per_segment = Vec::with_capacity(self.segments.len());

        for (edge_id, segment) in self.segments.iter().enumerate() {
            if !(segment.length.is_finite() && segment.length > 0.0) || !segment.start.is_finite() {
                return Err(LikelihoodError::config(format!(
                    "segment {} has invalid extent (start {}, length {})",
                    edge_id, segment.start, segment.length
                )));
            }
            let n_bins = (segment.length / self.bin_size).ceil().max(1.0) as usize;
            let width = segment.length / n_bins as f64;

            let first = graph.add_node(TrackNode::bin_edge(segment.start, edge_id));
            let mut previous_edge = first;
            for bin in 0..n_bins {
                let left = segment.start + bin as f64 * width;
                let center = graph.add_node(TrackNode::bin_center(left + width / 2.0, edge_id));
                let right = graph.add_node(TrackNode::bin_edge(left + width, edge_id));
                graph.add_edge(previous_edge, center, width / 2.0)?;
                graph.add_edge(center, right, width / 2.0)?;
                previous_edge = right;
            }
            ends.push((first, previous_edge));
            bins_per_segment.push(n_bins);
        }

        for &(a, b) in &self.junctions {
            let a = self.resolve(a, &ends)?;
            let b = self.resolve(b, &ends)?;
            graph.add_edge(a, b, 0.0)?;
        }

        let mut order: Vec<usize> = (0..self.segments.len()).collect();
        order.sort_by(|&a, &b| self.segments[a].start.total_cmp(&self.segments[b].start));

        let mut is_interior = Vec::new();
        let mut previous_end: Option<f64> = None;
        for index in order {
            let segment = self.segments[index];
            if let Some(end) = previous_end {
                let gap = segment.start - end;
                if gap > 0.0 {
                    let gap_bins = (gap / self.bin_size).round() as usize;
                    is_interior.extend(std::iter::repeat(false).take(gap_bins));
                }
            }
            is_interior.extend(std::iter::repeat(true).take(bins_per_segment[index]));
            previous_end = Some(segment.start + segment.length);
        }

        Ok(BuiltTrack { graph, is_interior })
    }

    fn resolve(&self, end: SegmentEnd, ends: &[(NodeId, NodeId)]) -> Result<NodeId> {
        let (segment, pick_end) = match end {
            SegmentEnd::Start(segment) => (segment, false),
            SegmentEnd::End(segment) => (segment, true),
        };
        let &(first, last) = ends.get(segment).ok_or_else(|| {
            LikelihoodError::config(format!("junction references unknown segment {}", segment))
        })?;
        Ok(if pick_end { last } else { first })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_graph::NodeIndexTable;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_track_bins() {
        let track = TrackLayout::linear(10.0, 2.0).build().unwrap();
        // 5 bins: 6 edges + 5 centers
        assert_eq!(track.graph.num_nodes(), 11);
        assert_eq!(track.is_interior, vec![true; 5]);

        let table = NodeIndexTable::from_graph(&track.graph).unwrap();
        assert_eq!(table.bin_center_positions(), &[1.0, 3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_w_track_interior_mask_has_gaps() {
        let track = TrackLayout::w_track(10.0, 4.0, 2.0, 2.0).build().unwrap();
        let interior = track.is_interior.iter().filter(|&&x| x).count();
        assert_eq!(interior, 5 + 2 + 5 + 2 + 5);
        assert_eq!(track.is_interior.len(), interior + 4);
        assert!(!track.is_interior[5]);
    }

    #[test]
    fn test_w_track_junction_distances() {
        let track = TrackLayout::w_track(10.0, 4.0, 2.0, 2.0).build().unwrap();
        let table = NodeIndexTable::from_graph(&track.graph).unwrap();
        let centers = table.bin_center_nodes();

        // From the first center bin (linear 1.0) to the first left-arm bin:
        // 9 along the center arm + 4 connector + 1 into the arm.
        let from = track.graph.shortest_path_lengths(centers[0]);
        let left_arm_first = centers[5 + 2];
        assert_relative_eq!(from[left_arm_first], 14.0);

        // Left and right arms are only connected through the center junction.
        let right_arm_first = centers[5 + 2 + 5 + 2];
        let from_left = track.graph.shortest_path_lengths(left_arm_first);
        assert_relative_eq!(from_left[right_arm_first], 1.0 + 4.0 + 4.0 + 1.0);
    }

    #[test]
    fn test_rejects_bad_layout() {
        assert!(TrackLayout::linear(10.0, 0.0).build().is_err());
        let mut layout = TrackLayout::new(1.0);
        layout.add_segment(0.0, 5.0);
        layout.connect(SegmentEnd::End(0), SegmentEnd::Start(3));
        assert!(layout.build().is_err());
    }
}
