//! The track graph and its sorted node index.
//!
//! A [`TrackGraph`] encodes the topology of a (possibly branching) track as
//! a weighted undirected graph whose edge weights are physical distances.
//! Every node carries its linear position, the id of the track segment it
//! lies on, and whether it is a bin edge or a bin center.
//!
//! The shared graph is read-only once built. Transient anchor nodes are
//! only ever inserted into a [`WorkingGraph`], an owned copy handed to a
//! single task.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{LikelihoodError, Result};

/// Index of a node inside a [`TrackGraph`].
pub type NodeId = usize;

/// A vertex of the track graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackNode {
    /// Coordinate along the unrolled 1-D track
    pub linear_position: f64,

    /// Track segment this node belongs to
    pub edge_id: usize,

    /// True for bin-edge nodes, false for bin-center nodes
    pub is_bin_edge: bool,
}

impl TrackNode {
    pub fn bin_edge(linear_position: f64, edge_id: usize) -> Self {
        Self {
            linear_position,
            edge_id,
            is_bin_edge: true,
        }
    }

    pub fn bin_center(linear_position: f64, edge_id: usize) -> Self {
        Self {
            linear_position,
            edge_id,
            is_bin_edge: false,
        }
    }
}

/// Weighted undirected graph over [`TrackNode`]s (adjacency lists).
#[derive(Debug, Clone, Default)]
pub struct TrackGraph {
    nodes: Vec<TrackNode>,
    adjacency: Vec<Vec<(NodeId, f64)>>,
}

impl TrackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id.
    pub fn add_node(&mut self, node: TrackNode) -> NodeId {
        self.nodes.push(node);
        self.adjacency.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Connects two nodes with a non-negative distance.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId, distance: f64) -> Result<()> {
        if a >= self.nodes.len() || b >= self.nodes.len() {
            return Err(LikelihoodError::config(format!(
                "edge ({}, {}) references a node outside the graph ({} nodes)",
                a,
                b,
                self.nodes.len()
            )));
        }
        if !(distance >= 0.0 && distance.is_finite()) {
            return Err(LikelihoodError::config(format!(
                "edge ({}, {}) has invalid distance {}",
                a, b, distance
            )));
        }
        self.adjacency[a].push((b, distance));
        if a != b {
            self.adjacency[b].push((a, distance));
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&TrackNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[TrackNode] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        let endpoints: usize = self.adjacency.iter().map(Vec::len).sum();
        let self_loops = self
            .adjacency
            .iter()
            .enumerate()
            .map(|(id, edges)| edges.iter().filter(|(to, _)| *to == id).count())
            .sum::<usize>();
        (endpoints - self_loops) / 2 + self_loops
    }

    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, f64)] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Shortest-path distance from `source` to every node.
    ///
    /// Unreachable nodes hold `f64::INFINITY`.
    pub fn shortest_path_lengths(&self, source: NodeId) -> Vec<f64> {
        dijkstra(&self.adjacency, source)
    }

    /// Returns an owned copy that can host a transient anchor node.
    pub fn working_copy(&self) -> WorkingGraph {
        WorkingGraph {
            graph: self.clone(),
            anchor: None,
        }
    }
}

// ============================================================================
// WORKING COPY (anchor insertion)
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Anchor {
    id: NodeId,
    left: NodeId,
    right: NodeId,
}

/// A private, mutable copy of a [`TrackGraph`].
///
/// Holds at most one anchor at a time. Inserting an anchor appends a node
/// and its edges; removing it pops exactly those entries, restoring the
/// copy to its original state.
#[derive(Debug, Clone)]
pub struct WorkingGraph {
    graph: TrackGraph,
    anchor: Option<Anchor>,
}

impl WorkingGraph {
    /// Inserts a virtual node between `left` and `right`.
    ///
    /// Any previous anchor is removed first. When both brackets are the
    /// same node a single edge with the smaller residual is used.
    pub fn insert_anchor(
        &mut self,
        left: NodeId,
        right: NodeId,
        left_dist: f64,
        right_dist: f64,
    ) -> Result<NodeId> {
        self.remove_anchor();

        let reference = *self.graph.node(left).ok_or_else(|| {
            LikelihoodError::config(format!("anchor bracket {} is not a graph node", left))
        })?;
        if self.graph.node(right).is_none() {
            return Err(LikelihoodError::config(format!(
                "anchor bracket {} is not a graph node",
                right
            )));
        }
        for residual in [left_dist, right_dist] {
            if !(residual >= 0.0 && residual.is_finite()) {
                return Err(LikelihoodError::config(format!(
                    "anchor residual distance must be non-negative, got {}",
                    residual
                )));
            }
        }

        let id = self.graph.add_node(TrackNode {
            linear_position: reference.linear_position,
            edge_id: reference.edge_id,
            is_bin_edge: true,
        });
        if left == right {
            self.graph.add_edge(left, id, left_dist.min(right_dist))?;
        } else {
            self.graph.add_edge(left, id, left_dist)?;
            self.graph.add_edge(id, right, right_dist)?;
        }
        self.anchor = Some(Anchor { id, left, right });
        Ok(id)
    }

    /// Removes the current anchor, if any.
    pub fn remove_anchor(&mut self) {
        let Some(anchor) = self.anchor.take() else {
            return;
        };
        // The anchor's edges were the last ones pushed onto each bracket.
        self.graph.adjacency[anchor.left].pop();
        if anchor.right != anchor.left {
            self.graph.adjacency[anchor.right].pop();
        }
        self.graph.adjacency.pop();
        self.graph.nodes.pop();
        debug_assert_eq!(self.graph.nodes.len(), anchor.id);
    }

    pub fn has_anchor(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn graph(&self) -> &TrackGraph {
        &self.graph
    }

    pub fn shortest_path_lengths(&self, source: NodeId) -> Vec<f64> {
        self.graph.shortest_path_lengths(source)
    }
}

// ============================================================================
// DIJKSTRA
// ============================================================================

#[derive(Debug)]
struct State {
    cost: f64,
    node: NodeId,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

fn dijkstra(adjacency: &[Vec<(NodeId, f64)>], source: NodeId) -> Vec<f64> {
    let mut distances = vec![f64::INFINITY; adjacency.len()];
    if source >= adjacency.len() {
        return distances;
    }

    let mut heap = BinaryHeap::new();
    distances[source] = 0.0;
    heap.push(State {
        cost: 0.0,
        node: source,
    });

    while let Some(State { cost, node }) = heap.pop() {
        if cost > distances[node] {
            continue;
        }
        for &(next, weight) in &adjacency[node] {
            let candidate = cost + weight;
            if candidate < distances[next] {
                distances[next] = candidate;
                heap.push(State {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }

    distances
}

// ============================================================================
// NODE INDEX TABLE
// ============================================================================

/// One row of the [`NodeIndexTable`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub node: NodeId,
    pub linear_position: f64,
    pub edge_id: usize,
    pub is_bin_edge: bool,
}

/// Nodes sorted by `(linear_position, edge_id)` for bracket searches.
///
/// Also fixes the bin-center ordering used for the columns of every
/// distance matrix: bin-center nodes sorted by linear position.
#[derive(Debug, Clone)]
pub struct NodeIndexTable {
    rows: Vec<NodeRow>,
    bin_centers: Vec<NodeId>,
    bin_center_positions: Vec<f64>,
}

impl NodeIndexTable {
    /// Builds the table from every node of `graph`.
    pub fn from_graph(graph: &TrackGraph) -> Result<Self> {
        if graph.num_nodes() == 0 {
            return Err(LikelihoodError::config("track graph has no nodes"));
        }

        let mut rows = Vec::with_capacity(graph.num_nodes());
        for (node, attrs) in graph.nodes().iter().enumerate() {
            if !attrs.linear_position.is_finite() {
                return Err(LikelihoodError::config(format!(
                    "node {} has non-finite linear position {}",
                    node, attrs.linear_position
                )));
            }
            rows.push(NodeRow {
                node,
                linear_position: attrs.linear_position,
                edge_id: attrs.edge_id,
                is_bin_edge: attrs.is_bin_edge,
            });
        }

        // `sort_by` is stable, so equal keys keep node-id order.
        rows.sort_by(|a, b| {
            a.linear_position
                .total_cmp(&b.linear_position)
                .then(a.edge_id.cmp(&b.edge_id))
        });

        let mut centers: Vec<&NodeRow> = rows.iter().filter(|row| !row.is_bin_edge).collect();
        centers.sort_by(|a, b| a.linear_position.total_cmp(&b.linear_position));
        let bin_centers = centers.iter().map(|row| row.node).collect();
        let bin_center_positions = centers.iter().map(|row| row.linear_position).collect();

        Ok(Self {
            rows,
            bin_centers,
            bin_center_positions,
        })
    }

    pub fn rows(&self) -> &[NodeRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bin-center node ids in column order.
    pub fn bin_center_nodes(&self) -> &[NodeId] {
        &self.bin_centers
    }

    /// Linear positions of the bin centers, in column order.
    pub fn bin_center_positions(&self) -> &[f64] {
        &self.bin_center_positions
    }

    pub fn num_bin_centers(&self) -> usize {
        self.bin_centers.len()
    }

    /// Index of the first row whose linear position is `>= position`.
    pub fn lower_bound(&self, position: f64) -> usize {
        self.rows
            .partition_point(|row| row.linear_position < position)
    }

    /// Index of the first row minimising `|linear_position - position|`.
    pub fn nearest(&self, position: f64) -> usize {
        let mut best = 0;
        let mut best_diff = f64::INFINITY;
        for (i, row) in self.rows.iter().enumerate() {
            let diff = (row.linear_position - position).abs();
            if diff < best_diff {
                best_diff = diff;
                best = i;
            }
        }
        best
    }
}
