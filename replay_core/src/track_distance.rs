//! Distance Solver - linear positions to shortest-path track distances
//!
//! For every observed linear position:
//! 1. Bracket search in the [`NodeIndexTable`] (same-edge neighbours, or the
//!    nearest node when the position straddles a segment boundary)
//! 2. Anchor insertion into a private [`WorkingGraph`]
//! 3. Single-source Dijkstra from the anchor to every bin center
//!
//! Positions are processed in fixed-size batches on the rayon pool. Each
//! batch owns its own working copy of the graph and the batches are
//! reassembled in submission order.

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{LikelihoodError, Result};
use crate::track_graph::{NodeId, NodeIndexTable, TrackGraph, WorkingGraph};

/// Where an observation sits relative to the track nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket {
    /// Anchor between `left` and `right` with the given residual distances.
    Nodes {
        left: NodeId,
        right: NodeId,
        left_dist: f64,
        right_dist: f64,
    },

    /// The position was NaN; its distance row is NaN as well.
    Missing,
}

/// Finds the bracketing nodes of a single position.
pub fn find_bracket(position: f64, table: &NodeIndexTable) -> Bracket {
    if position.is_nan() || table.is_empty() {
        return Bracket::Missing;
    }

    let rows = table.rows();
    let insertion = table.lower_bound(position);

    if insertion > 0 && insertion < rows.len() {
        let left = rows[insertion - 1];
        let right = rows[insertion];
        if left.edge_id == right.edge_id {
            return Bracket::Nodes {
                left: left.node,
                right: right.node,
                left_dist: (left.linear_position - position).abs(),
                right_dist: (right.linear_position - position).abs(),
            };
        }
    }

    // Segment boundary or outside the track: collapse onto the nearest node.
    let nearest = rows[table.nearest(position)];
    let residual = (nearest.linear_position - position).abs();
    Bracket::Nodes {
        left: nearest.node,
        right: nearest.node,
        left_dist: residual,
        right_dist: residual,
    }
}

/// Finds the bracketing nodes of every position.
pub fn find_brackets(positions: &[f64], table: &NodeIndexTable) -> Vec<Bracket> {
    positions
        .iter()
        .map(|&position| find_bracket(position, table))
        .collect()
}

/// Solves the shortest-path distance from every position to every bin center.
///
/// Returns an `n_positions × n_bin_centers` matrix whose columns follow
/// [`NodeIndexTable::bin_center_nodes`]. Fails with
/// [`LikelihoodError::GraphTopology`] if any bin center is unreachable from
/// any anchor; no partial result is returned.
pub fn solve_distances(
    positions: &[f64],
    graph: &TrackGraph,
    table: &NodeIndexTable,
    batch_size: usize,
) -> Result<DMatrix<f64>> {
    if batch_size == 0 {
        return Err(LikelihoodError::config("batch size must be at least 1"));
    }
    if let Some(missing) = table
        .rows()
        .iter()
        .find(|row| graph.node(row.node).is_none())
    {
        return Err(LikelihoodError::config(format!(
            "node index table references node {} missing from the graph",
            missing.node
        )));
    }

    let brackets = find_brackets(positions, table);
    let bin_centers = table.bin_center_nodes();
    let n_bins = bin_centers.len();

    info!(
        positions = positions.len(),
        bin_centers = n_bins,
        batch_size,
        "solving track distances"
    );

    let blocks: Vec<Vec<f64>> = brackets
        .par_chunks(batch_size)
        .enumerate()
        .map(|(batch, chunk)| {
            debug!(batch, len = chunk.len(), "distance batch started");
            solve_batch(graph.working_copy(), chunk, bin_centers)
        })
        .collect::<Result<_>>()?;

    let data: Vec<f64> = blocks.into_iter().flatten().collect();
    Ok(DMatrix::from_row_slice(positions.len(), n_bins, &data))
}

/// Solves one batch on its own working copy, returning row-major distances.
fn solve_batch(
    mut working: WorkingGraph,
    brackets: &[Bracket],
    bin_centers: &[NodeId],
) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(brackets.len() * bin_centers.len());

    for bracket in brackets {
        let Bracket::Nodes {
            left,
            right,
            left_dist,
            right_dist,
        } = *bracket
        else {
            out.extend(std::iter::repeat(f64::NAN).take(bin_centers.len()));
            continue;
        };

        let anchor = working.insert_anchor(left, right, left_dist, right_dist)?;
        let distances = working.shortest_path_lengths(anchor);
        working.remove_anchor();

        for &center in bin_centers {
            let distance = distances[center];
            if !distance.is_finite() {
                return Err(LikelihoodError::unreachable(center));
            }
            out.push(distance);
        }
    }

    Ok(out)
}

/// Bundles a track graph, its index table and a batch size.
#[derive(Debug, Clone)]
pub struct DistanceSolver {
    graph: TrackGraph,
    table: NodeIndexTable,
    batch_size: usize,
}

impl DistanceSolver {
    /// Creates a solver, building the node index table from the graph.
    pub fn new(graph: TrackGraph) -> Result<Self> {
        let table = NodeIndexTable::from_graph(&graph)?;
        Ok(Self {
            graph,
            table,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Sets the number of positions per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn graph(&self) -> &TrackGraph {
        &self.graph
    }

    pub fn table(&self) -> &NodeIndexTable {
        &self.table
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_bin_centers(&self) -> usize {
        self.table.num_bin_centers()
    }

    /// See [`solve_distances`].
    pub fn solve(&self, positions: &[f64]) -> Result<DMatrix<f64>> {
        solve_distances(positions, &self.graph, &self.table, self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_graph::TrackNode;
    use crate::track_layout::TrackLayout;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Nodes at 0, 5, 10 on one segment; 0 and 10 are bin centers.
    fn three_node_path() -> (TrackGraph, NodeIndexTable) {
        let mut graph = TrackGraph::new();
        let a = graph.add_node(TrackNode::bin_center(0.0, 0));
        let b = graph.add_node(TrackNode::bin_edge(5.0, 0));
        let c = graph.add_node(TrackNode::bin_center(10.0, 0));
        graph.add_edge(a, b, 5.0).unwrap();
        graph.add_edge(b, c, 5.0).unwrap();
        let table = NodeIndexTable::from_graph(&graph).unwrap();
        (graph, table)
    }

    /// Two segments meeting at a junction: [0, 4] on edge 0, [10, 14] on edge 1.
    fn two_segment_graph() -> (TrackGraph, NodeIndexTable) {
        let mut graph = TrackGraph::new();
        let a0 = graph.add_node(TrackNode::bin_edge(0.0, 0));
        let a1 = graph.add_node(TrackNode::bin_center(2.0, 0));
        let a2 = graph.add_node(TrackNode::bin_edge(4.0, 0));
        let b0 = graph.add_node(TrackNode::bin_edge(10.0, 1));
        let b1 = graph.add_node(TrackNode::bin_center(12.0, 1));
        let b2 = graph.add_node(TrackNode::bin_edge(14.0, 1));
        graph.add_edge(a0, a1, 2.0).unwrap();
        graph.add_edge(a1, a2, 2.0).unwrap();
        graph.add_edge(b0, b1, 2.0).unwrap();
        graph.add_edge(b1, b2, 2.0).unwrap();
        graph.add_edge(a2, b0, 0.0).unwrap();
        let table = NodeIndexTable::from_graph(&graph).unwrap();
        (graph, table)
    }

    #[test]
    fn test_three_node_path_scenario() {
        let (graph, table) = three_node_path();
        let distances = solve_distances(&[0.0, 2.5, 10.0], &graph, &table, 10_000).unwrap();

        assert_eq!(distances.shape(), (3, 2));
        assert_relative_eq!(distances[(0, 0)], 0.0);
        assert_relative_eq!(distances[(0, 1)], 10.0);
        assert_relative_eq!(distances[(1, 0)], 2.5);
        assert_relative_eq!(distances[(1, 1)], 7.5);
        assert_relative_eq!(distances[(2, 0)], 10.0);
        assert_relative_eq!(distances[(2, 1)], 0.0);
    }

    #[test]
    fn test_same_edge_bracket_uses_both_neighbours() {
        let (_, table) = three_node_path();
        let bracket = find_bracket(6.0, &table);
        assert_eq!(
            bracket,
            Bracket::Nodes {
                left: 1,
                right: 2,
                left_dist: 1.0,
                right_dist: 4.0,
            }
        );
    }

    #[test]
    fn test_segment_boundary_falls_back_to_nearest_node() {
        let (graph, table) = two_segment_graph();

        // 6.0 lies between edge 0's end (4.0) and edge 1's start (10.0).
        let bracket = find_bracket(6.0, &table);
        assert_eq!(
            bracket,
            Bracket::Nodes {
                left: 2,
                right: 2,
                left_dist: 2.0,
                right_dist: 2.0,
            }
        );

        // 8.0 is closer to edge 1's start.
        let bracket = find_bracket(8.0, &table);
        assert_eq!(
            bracket,
            Bracket::Nodes {
                left: 3,
                right: 3,
                left_dist: 2.0,
                right_dist: 2.0,
            }
        );

        let distances = solve_distances(&[6.0, 8.0], &graph, &table, 1).unwrap();
        // Bin centers at 2.0 (node 1) and 12.0 (node 4).
        assert_relative_eq!(distances[(0, 0)], 2.0 + 2.0);
        assert_relative_eq!(distances[(0, 1)], 2.0 + 0.0 + 2.0);
        assert_relative_eq!(distances[(1, 0)], 2.0 + 0.0 + 2.0);
        assert_relative_eq!(distances[(1, 1)], 2.0 + 2.0);
    }

    #[test]
    fn test_boundary_fallback_differs_from_same_edge_path() {
        let (_, table) = two_segment_graph();
        // Exactly on edge 1's start: the lower bound is that node, whose left
        // neighbour is on edge 0, so the nearest-node rule applies.
        let bracket = find_bracket(10.0, &table);
        assert_eq!(
            bracket,
            Bracket::Nodes {
                left: 3,
                right: 3,
                left_dist: 0.0,
                right_dist: 0.0,
            }
        );
    }

    #[test]
    fn test_out_of_range_maps_to_boundary_node() {
        let (graph, table) = three_node_path();
        let distances = solve_distances(&[-3.0, 14.0], &graph, &table, 10_000).unwrap();
        assert_relative_eq!(distances[(0, 0)], 3.0);
        assert_relative_eq!(distances[(0, 1)], 13.0);
        assert_relative_eq!(distances[(1, 0)], 14.0);
        assert_relative_eq!(distances[(1, 1)], 4.0);
    }

    #[test]
    fn test_positions_on_bin_centers_match_graph_distances() {
        let track = TrackLayout::w_track(10.0, 4.0, 2.0, 2.0).build().unwrap();
        let solver = DistanceSolver::new(track.graph).unwrap().with_batch_size(3);
        let centers = solver.table().bin_center_nodes().to_vec();
        let positions = solver.table().bin_center_positions().to_vec();

        let distances = solver.solve(&positions).unwrap();
        for (row, &source) in centers.iter().enumerate() {
            let expected = solver.graph().shortest_path_lengths(source);
            for (col, &target) in centers.iter().enumerate() {
                assert_relative_eq!(distances[(row, col)], expected[target], epsilon = 1e-9);
            }
            assert_relative_eq!(distances[(row, row)], 0.0);
        }
    }

    #[test]
    fn test_nan_position_gives_nan_row() {
        let (graph, table) = three_node_path();
        let distances = solve_distances(&[f64::NAN, 5.0], &graph, &table, 10_000).unwrap();
        assert!(distances[(0, 0)].is_nan());
        assert!(distances[(0, 1)].is_nan());
        assert_relative_eq!(distances[(1, 0)], 5.0);
    }

    #[test]
    fn test_disconnected_bin_center_is_topology_error() {
        let (mut graph, _) = three_node_path();
        graph.add_node(TrackNode::bin_center(20.0, 1));
        let table = NodeIndexTable::from_graph(&graph).unwrap();

        let result = solve_distances(&[2.5], &graph, &table, 10_000);
        assert!(matches!(
            result,
            Err(LikelihoodError::GraphTopology { node: 3, .. })
        ));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let (graph, table) = three_node_path();
        let result = solve_distances(&[1.0], &graph, &table, 0);
        assert!(matches!(result, Err(LikelihoodError::Configuration(_))));
    }

    #[test]
    fn test_empty_positions() {
        let (graph, table) = three_node_path();
        let distances = solve_distances(&[], &graph, &table, 10).unwrap();
        assert_eq!(distances.shape(), (0, 2));
    }

    #[test]
    fn test_shared_graph_is_untouched() {
        let (graph, table) = three_node_path();
        let before = graph.num_nodes();
        solve_distances(&[1.0, 7.0, 9.0], &graph, &table, 2).unwrap();
        assert_eq!(graph.num_nodes(), before);
        assert_eq!(graph.num_edges(), 2);
    }

    proptest! {
        #[test]
        fn prop_batch_size_invariance(
            positions in proptest::collection::vec(-5.0f64..55.0, 0..40),
            batch in 1usize..17,
        ) {
            let track = TrackLayout::w_track(10.0, 4.0, 2.0, 2.0).build().unwrap();
            let table = NodeIndexTable::from_graph(&track.graph).unwrap();

            let single = solve_distances(&positions, &track.graph, &table, 1).unwrap();
            let batched = solve_distances(&positions, &track.graph, &table, batch).unwrap();
            let whole = solve_distances(&positions, &track.graph, &table, 10_000).unwrap();

            prop_assert_eq!(&single, &batched);
            prop_assert_eq!(&single, &whole);
        }

        #[test]
        fn prop_distances_are_non_negative(
            positions in proptest::collection::vec(-5.0f64..55.0, 1..20),
        ) {
            let track = TrackLayout::w_track(10.0, 4.0, 2.0, 2.0).build().unwrap();
            let table = NodeIndexTable::from_graph(&track.graph).unwrap();
            let distances = solve_distances(&positions, &track.graph, &table, 4).unwrap();
            prop_assert!(distances.iter().all(|&d| d >= 0.0 && d.is_finite()));
        }
    }
}
