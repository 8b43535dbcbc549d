//! Hierarchical Navigable Small World index over buffer slots.
//!
//! The index is a multilayer proximity graph keyed by slot id. It never owns
//! vector data; every distance evaluation reads through the
//! [`VectorBuffer`](crate::buffer::VectorBuffer) passed by the caller, so
//! buffer and index stay consistent under the store's single write lock.
//!
//! Nodes live in a slot-keyed arena (`Vec<Option<Node>>`) with per-layer
//! neighbor lists, not pointer graphs. Ties in distance always break toward
//! the lower slot id, which makes insertion and search deterministic for a
//! fixed corpus.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::Rng;
use tracing::trace;

use crate::buffer::VectorBuffer;
use crate::error::{Result, StoreError};
use crate::similarity;
use crate::types::DistanceMetric;

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Tunable construction and search parameters.
#[derive(Debug, Clone)]
pub struct HnswParams {
    /// Target neighbors per node per layer above 0.
    pub m: usize,
    /// Target neighbors at layer 0 (2·m by convention).
    pub m0: usize,
    /// Candidate-list width during insertion.
    pub ef_construction: usize,
    /// Default candidate-list width at query time.
    pub ef_search: usize,
    /// `1 / ln(m)`; controls the expected layer distribution.
    pub level_multiplier: f64,
}

impl HnswParams {
    /// Parameters derived from a neighbor count `m`.
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            m0: m * 2,
            ef_construction: 200,
            ef_search: 50,
            level_multiplier: 1.0 / (m as f64).ln(),
        }
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::with_m(16)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal types
// ─────────────────────────────────────────────────────────────────────────────

/// Per-node adjacency: one neighbor list per layer up to the node's level.
#[derive(Debug, Clone)]
struct Node {
    /// Assigned level; the node appears on layers `0..=level`.
    level: usize,
    /// `neighbors[layer]` is the adjacency list at that layer.
    neighbors: Vec<Vec<usize>>,
}

impl Node {
    fn new(level: usize) -> Self {
        Self {
            level,
            neighbors: vec![Vec::new(); level + 1],
        }
    }
}

/// A (distance, slot) pair ordered by distance, ties toward the lower slot.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    slot: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

/// Multilayer ANN graph over occupied buffer slots.
pub struct HnswIndex {
    params: HnswParams,
    metric: DistanceMetric,
    /// Slot-keyed arena; `None` marks a slot with no node.
    nodes: Vec<Option<Node>>,
    /// Entry point `(slot, level)`; always an occupied slot when non-empty.
    entry: Option<(usize, usize)>,
    len: usize,
}

impl HnswIndex {
    pub fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            params,
            metric,
            nodes: Vec::new(),
            entry: None,
            len: 0,
        }
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entry point level, if the index is non-empty.
    pub fn entry_level(&self) -> Option<usize> {
        self.entry.map(|(_, level)| level)
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Whether `slot` has a node in the graph.
    pub fn contains(&self, slot: usize) -> bool {
        matches!(self.nodes.get(slot), Some(Some(_)))
    }

    /// Distance from a query to the vector at `slot`. `None` for freed slots,
    /// which lets searches skip them silently.
    fn dist_to_query(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        slot: usize,
    ) -> Option<f32> {
        let v = buffer.vector_at(slot)?;
        let mag = buffer.magnitude_at(slot)?;
        Some(similarity::distance(self.metric, query, v, query_mag, mag))
    }

    /// Distance between two stored vectors.
    fn dist_between(&self, buffer: &VectorBuffer, a: usize, b: usize) -> Option<f32> {
        let va = buffer.vector_at(a)?;
        let vb = buffer.vector_at(b)?;
        Some(similarity::distance(
            self.metric,
            va,
            vb,
            buffer.magnitude_at(a)?,
            buffer.magnitude_at(b)?,
        ))
    }

    /// Draw a node level from the geometric distribution
    /// `L = ⌊−ln(U) · level_multiplier⌋`, U uniform in (0, 1].
    fn draw_level<R: Rng>(&self, rng: &mut R) -> usize {
        let u: f64 = 1.0 - rng.gen::<f64>(); // (0, 1]
        (-u.ln() * self.params.level_multiplier).floor() as usize
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Insertion
    // ─────────────────────────────────────────────────────────────────────────

    /// Link `slot` into the graph.
    ///
    /// The slot must already hold a vector in the buffer; the index reads it
    /// for every distance evaluation during descent and linking.
    pub fn insert<R: Rng>(
        &mut self,
        buffer: &VectorBuffer,
        slot: usize,
        rng: &mut R,
    ) -> Result<()> {
        let query = buffer
            .vector_at(slot)
            .ok_or_else(|| {
                StoreError::Internal(format!("index insert for unoccupied slot {}", slot))
            })?
            .to_vec();
        let query_mag = buffer.magnitude_at(slot).unwrap_or(0.0);

        if self.contains(slot) {
            return Err(StoreError::Internal(format!(
                "slot {} already indexed",
                slot
            )));
        }

        let level = self.draw_level(rng);
        if self.nodes.len() <= slot {
            self.nodes.resize_with(slot + 1, || None);
        }

        let Some((entry_slot, entry_level)) = self.entry else {
            // First node becomes the entry point.
            self.nodes[slot] = Some(Node::new(level));
            self.entry = Some((slot, level));
            self.len = 1;
            trace!(slot, level, "hnsw seeded");
            return Ok(());
        };

        self.nodes[slot] = Some(Node::new(level));
        self.len += 1;

        // Greedy-descend the layers above the new node's level.
        let mut current = entry_slot;
        for layer in ((level + 1)..=entry_level).rev() {
            current = self.greedy_closest(buffer, &query, query_mag, current, layer);
        }

        // Link from min(level, entry_level) down to 0.
        let mut entry_points = vec![current];
        for layer in (0..=level.min(entry_level)).rev() {
            let candidates = self.search_layer(
                buffer,
                &query,
                query_mag,
                &entry_points,
                self.params.ef_construction,
                layer,
            );

            let m_cap = self.params.max_neighbors(layer);
            let selected = self.select_neighbors(buffer, &candidates, m_cap);

            for &neighbor in &selected {
                self.link(slot, neighbor, layer);
                self.link(neighbor, slot, layer);
                self.trim_neighbors(buffer, neighbor, layer);
            }

            entry_points = candidates.iter().map(|c| c.slot).collect();
            if entry_points.is_empty() {
                entry_points = vec![current];
            }
        }

        if level > entry_level {
            self.entry = Some((slot, level));
        }
        Ok(())
    }

    fn link(&mut self, from: usize, to: usize, layer: usize) {
        if let Some(Some(node)) = self.nodes.get_mut(from) {
            if layer < node.neighbors.len() && !node.neighbors[layer].contains(&to) {
                node.neighbors[layer].push(to);
            }
        }
    }

    /// Re-select a node's neighbor list when it exceeds the layer cap.
    fn trim_neighbors(&mut self, buffer: &VectorBuffer, slot: usize, layer: usize) {
        let cap = self.params.max_neighbors(layer);
        let current = match self.nodes.get(slot) {
            Some(Some(node))
                if layer < node.neighbors.len() && node.neighbors[layer].len() > cap =>
            {
                node.neighbors[layer].clone()
            }
            _ => return,
        };

        let mut candidates: Vec<Candidate> = current
            .iter()
            .filter_map(|&n| {
                self.dist_between(buffer, slot, n)
                    .map(|dist| Candidate { dist, slot: n })
            })
            .collect();
        candidates.sort();

        let kept = self.select_neighbors(buffer, &candidates, cap);
        if let Some(Some(node)) = self.nodes.get_mut(slot) {
            node.neighbors[layer] = kept;
        }
    }

    /// Heuristic neighbor selection over distance-sorted candidates.
    ///
    /// A candidate is kept only if it is closer to the query node than to
    /// every neighbor already kept; that favors spread over raw proximity.
    /// Pruned candidates backfill in order if the list comes up short, so a
    /// tight cluster cannot leave a node under-connected.
    fn select_neighbors(
        &self,
        buffer: &VectorBuffer,
        candidates: &[Candidate],
        m: usize,
    ) -> Vec<usize> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut pruned: Vec<usize> = Vec::new();

        for &c in candidates {
            if selected.len() >= m {
                break;
            }
            let mut keep = true;
            for s in &selected {
                if let Some(d) = self.dist_between(buffer, c.slot, s.slot) {
                    if d < c.dist {
                        keep = false;
                        break;
                    }
                }
            }
            if keep {
                selected.push(c);
            } else {
                pruned.push(c.slot);
            }
        }

        let mut result: Vec<usize> = selected.into_iter().map(|c| c.slot).collect();
        for slot in pruned {
            if result.len() >= m {
                break;
            }
            result.push(slot);
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────────

    /// Move greedily toward the query on one layer until no neighbor improves.
    fn greedy_closest(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        start: usize,
        layer: usize,
    ) -> usize {
        let mut current = start;
        let mut current_dist = match self.dist_to_query(buffer, query, query_mag, current) {
            Some(d) => d,
            None => return current,
        };

        loop {
            let mut improved = false;
            let neighbors = match self.nodes.get(current) {
                Some(Some(node)) if layer < node.neighbors.len() => &node.neighbors[layer],
                _ => return current,
            };
            for &n in neighbors {
                if let Some(d) = self.dist_to_query(buffer, query, query_mag, n) {
                    if d < current_dist {
                        current = n;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded best-first search on one layer.
    ///
    /// Classic beam search: a min-heap of nodes to expand ordered by
    /// distance-to-query, a bounded max-heap of the best `ef` found so far;
    /// expansion stops when the nearest unexpanded candidate is farther than
    /// the worst of the current best. Returns candidates sorted ascending.
    fn search_layer(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        entry_points: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut to_visit: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            if let Some(dist) = self.dist_to_query(buffer, query, query_mag, ep) {
                let c = Candidate { dist, slot: ep };
                to_visit.push(std::cmp::Reverse(c));
                best.push(c);
            }
        }
        while best.len() > ef {
            best.pop();
        }

        while let Some(std::cmp::Reverse(current)) = to_visit.pop() {
            if best.len() >= ef {
                let worst = best.peek().expect("non-empty").dist;
                if current.dist > worst {
                    break;
                }
            }

            let neighbors = match self.nodes.get(current.slot) {
                Some(Some(node)) if layer < node.neighbors.len() => &node.neighbors[layer],
                _ => continue,
            };

            for &n in neighbors {
                if !visited.insert(n) {
                    continue;
                }
                // Freed slots yield no distance and are skipped silently.
                let Some(dist) = self.dist_to_query(buffer, query, query_mag, n) else {
                    continue;
                };
                let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if best.len() < ef || dist < worst {
                    let c = Candidate { dist, slot: n };
                    to_visit.push(std::cmp::Reverse(c));
                    best.push(c);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut result = best.into_vec();
        result.sort();
        result
    }

    /// Top-k approximate nearest slots, as `(slot, distance)` sorted by
    /// ascending distance with ties toward the lower slot.
    ///
    /// An empty index yields an empty result. The beam width is
    /// `max(ef, k)`.
    pub fn search(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Vec<(usize, f32)> {
        let Some((entry_slot, entry_level)) = self.entry else {
            return Vec::new();
        };
        let query_mag = similarity::magnitude(query);

        let mut current = entry_slot;
        for layer in (1..=entry_level).rev() {
            current = self.greedy_closest(buffer, query, query_mag, current, layer);
        }

        let beam = ef.max(k);
        let candidates = self.search_layer(buffer, query, query_mag, &[current], beam, 0);

        candidates
            .into_iter()
            .take(k)
            .map(|c| (c.slot, c.dist))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deletion
    // ─────────────────────────────────────────────────────────────────────────

    /// Unlink `slot` from the graph.
    ///
    /// The node is removed from every neighbor's adjacency list on every
    /// layer where it appears (real unlinking, not a tombstone), so a freed
    /// slot can never surface in a later search. If the entry point dies, the
    /// highest-level survivor (ties toward the lower slot) takes over.
    pub fn remove(&mut self, slot: usize) -> bool {
        let node = match self.nodes.get_mut(slot) {
            Some(n) => match n.take() {
                Some(node) => node,
                None => return false,
            },
            None => return false,
        };
        self.len -= 1;

        // Collect unique touched neighbors across layers, then unlink.
        let mut touched: HashSet<usize> = HashSet::new();
        for layer_neighbors in &node.neighbors {
            touched.extend(layer_neighbors.iter().copied());
        }
        for neighbor in touched {
            if let Some(Some(n)) = self.nodes.get_mut(neighbor) {
                for list in &mut n.neighbors {
                    list.retain(|&s| s != slot);
                }
            }
        }

        if self.entry.map(|(s, _)| s) == Some(slot) {
            self.entry = self.promote_entry();
        }
        true
    }

    /// Pick a new entry point: the highest-level node, ties by slot id.
    fn promote_entry(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (slot, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                let better = match best {
                    None => true,
                    Some((best_slot, best_level)) => {
                        node.level > best_level || (node.level == best_level && slot < best_slot)
                    }
                };
                if better {
                    best = Some((slot, node.level));
                }
            }
        }
        best
    }

    /// Drop all nodes.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.entry = None;
        self.len = 0;
    }
}
