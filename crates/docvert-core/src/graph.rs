//! Directed multigraph over format vertices, with BFS-based reachability
//! and shortest-path queries.
//!
//! Grounded line-for-line on `examples/original_source/src/Graph.{h,cpp}`:
//! `bfs_init`, `getReachableTo` → [`Graph::reachable_to`], `getReachable` →
//! [`Graph::reachable_from`], `isReachable` → [`Graph::is_reachable`],
//! `getPath` → [`Graph::shortest_path`], `addEdge` → [`Graph::add_edge`].

use std::collections::VecDeque;

use crate::format::FormatId;

/// An edge id, assigned at `add_edge` time and stable across a single
/// graph lifetime (it is *not* stable across a [`Graph::init`] rebuild).
pub type ArrowId = usize;

#[derive(Clone, Debug, Default)]
struct Vertex {
    /// Arrow ids of edges ending at this vertex.
    r#in: Vec<ArrowId>,
    /// Arrow ids of edges starting at this vertex.
    out: Vec<ArrowId>,
    /// Scratch BFS state. Left dirty between calls unless the caller asks
    /// for `clear_visited = true` (see the design notes on this in
    /// spec §9 — acceptable only because the engine is single-threaded).
    visited: bool,
}

#[derive(Clone, Copy, Debug)]
struct Arrow {
    from: FormatId,
    to: FormatId,
    id: ArrowId,
}

/// The converter graph: vertices mirror format ids, edges are converters.
#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    arrows: Vec<Arrow>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `n` vertices and clears all arrows.
    pub fn init(&mut self, n: usize) {
        self.vertices = vec![Vertex::default(); n];
        self.arrows.clear();
    }

    /// Appends an edge `from -> to`, recording it in both endpoints'
    /// in/out lists. `id` is `arrows.len()` before the push, so ids are
    /// dense and monotonically increasing.
    pub fn add_edge(&mut self, from: FormatId, to: FormatId) -> ArrowId {
        let id = self.arrows.len();
        self.arrows.push(Arrow { from, to, id });
        self.vertices[from].out.push(id);
        self.vertices[to].r#in.push(id);
        id
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn arrow_count(&self) -> usize {
        self.arrows.len()
    }

    fn clear_visited(&mut self) {
        for vertex in &mut self.vertices {
            vertex.visited = false;
        }
    }

    /// BFS over out-edges from `src`. `excludes` vertices are never
    /// visited or returned (but may still be passed *through* is not
    /// possible since they're never enqueued at all).
    ///
    /// `only_with_viewer` exists in the original to filter the visible
    /// menu to formats with a configured viewer; here it is expressed as
    /// a caller-supplied predicate over `FormatId` so the graph itself
    /// stays format-agnostic.
    pub fn reachable_from(
        &mut self,
        src: FormatId,
        clear_visited: bool,
        excludes: &[FormatId],
        only: impl Fn(FormatId) -> bool,
    ) -> Vec<FormatId> {
        if clear_visited {
            self.clear_visited();
        }

        if src >= self.vertices.len() {
            return Vec::new();
        }

        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        self.vertices[src].visited = true;
        queue.push_back(src);

        while let Some(current) = queue.pop_front() {
            let out_edges = self.vertices[current].out.clone();
            for arrow_id in out_edges {
                let to = self.arrows[arrow_id].to;
                if self.vertices[to].visited || excludes.contains(&to) {
                    continue;
                }
                self.vertices[to].visited = true;
                if only(to) {
                    result.push(to);
                }
                queue.push_back(to);
            }
        }

        result
    }

    /// BFS over in-edges to `dst`. `dst` itself is excluded from the
    /// result when `dst` is the registry's native "document" format —
    /// the editor cannot "import" its own native format.
    pub fn reachable_to(
        &mut self,
        dst: FormatId,
        clear_visited: bool,
        document_format: Option<FormatId>,
    ) -> Vec<FormatId> {
        if clear_visited {
            self.clear_visited();
        }

        if dst >= self.vertices.len() {
            return Vec::new();
        }

        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        self.vertices[dst].visited = true;
        queue.push_back(dst);

        while let Some(current) = queue.pop_front() {
            let in_edges = self.vertices[current].r#in.clone();
            for arrow_id in in_edges {
                let from = self.arrows[arrow_id].from;
                if self.vertices[from].visited {
                    continue;
                }
                self.vertices[from].visited = true;
                result.push(from);
                queue.push_back(from);
            }
        }

        if document_format == Some(dst) {
            result.retain(|&id| id != dst);
        }

        result
    }

    /// BFS that terminates as soon as `dst` is reached.
    pub fn is_reachable(&mut self, src: FormatId, dst: FormatId) -> bool {
        if src == dst {
            return false;
        }

        self.clear_visited();

        if src >= self.vertices.len() || dst >= self.vertices.len() {
            return false;
        }

        let mut queue = VecDeque::new();
        self.vertices[src].visited = true;
        queue.push_back(src);

        while let Some(current) = queue.pop_front() {
            if current == dst {
                return true;
            }

            let out_edges = self.vertices[current].out.clone();
            for arrow_id in out_edges {
                let to = self.arrows[arrow_id].to;
                if self.vertices[to].visited {
                    continue;
                }
                self.vertices[to].visited = true;
                queue.push_back(to);
            }
        }

        false
    }

    /// BFS labeling each newly-visited vertex with the path-prefix used
    /// to reach it (predecessor's path + the edge just taken); returns
    /// the path stored at `dst`. Ties are broken by edge insertion order
    /// because `out` lists are walked in that order. Empty ⇔ unreachable
    /// or `src == dst`.
    pub fn shortest_path(&mut self, src: FormatId, dst: FormatId) -> Vec<ArrowId> {
        if src == dst || src >= self.vertices.len() || dst >= self.vertices.len() {
            return Vec::new();
        }

        self.clear_visited();

        let mut paths: Vec<Option<Vec<ArrowId>>> = vec![None; self.vertices.len()];
        paths[src] = Some(Vec::new());

        let mut queue = VecDeque::new();
        self.vertices[src].visited = true;
        queue.push_back(src);

        while let Some(current) = queue.pop_front() {
            if current == dst {
                return paths[current].clone().unwrap_or_default();
            }

            let out_edges = self.vertices[current].out.clone();
            let current_path = paths[current].clone().unwrap_or_default();

            for arrow_id in out_edges {
                let to = self.arrows[arrow_id].to;
                if self.vertices[to].visited {
                    continue;
                }
                self.vertices[to].visited = true;

                let mut extended = current_path.clone();
                extended.push(arrow_id);
                paths[to] = Some(extended);

                queue.push_back(to);
            }
        }

        paths[dst].clone().unwrap_or_default()
    }

    /// The `(from, to)` format-id endpoints of an arrow, for resolving
    /// back to a [`Converter`](crate::converter::Converter) by the
    /// engine.
    pub fn arrow_endpoints(&self, id: ArrowId) -> Option<(FormatId, FormatId)> {
        self.arrows.get(id).map(|arrow| (arrow.from, arrow.to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_count_matches_init() {
        let mut graph = Graph::new();
        graph.init(3);
        assert_eq!(graph.vertex_count(), 3);
    }

    #[test]
    fn arrow_ids_are_dense_and_unique() {
        let mut graph = Graph::new();
        graph.init(4);
        let ids: Vec<_> = (0..3).map(|i| graph.add_edge(i, i + 1)).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(graph.arrow_count(), 3);
    }

    #[test]
    fn shortest_path_direct_edge() {
        let mut graph = Graph::new();
        graph.init(2);
        let id = graph.add_edge(0, 1);
        assert_eq!(graph.shortest_path(0, 1), vec![id]);
    }

    #[test]
    fn shortest_path_two_hop_preserves_order() {
        let mut graph = Graph::new();
        graph.init(3);
        let ab = graph.add_edge(0, 1);
        let bc = graph.add_edge(1, 2);
        assert_eq!(graph.shortest_path(0, 2), vec![ab, bc]);
    }

    #[test]
    fn shortest_path_same_vertex_is_empty() {
        let mut graph = Graph::new();
        graph.init(2);
        graph.add_edge(0, 1);
        assert_eq!(graph.shortest_path(0, 0), Vec::<ArrowId>::new());
    }

    #[test]
    fn shortest_path_unreachable_is_empty() {
        let mut graph = Graph::new();
        graph.init(2);
        assert_eq!(graph.shortest_path(0, 1), Vec::<ArrowId>::new());
    }

    #[test]
    fn is_reachable_true_and_false() {
        let mut graph = Graph::new();
        graph.init(3);
        graph.add_edge(0, 1);

        assert!(graph.is_reachable(0, 1));
        assert!(!graph.is_reachable(0, 2));
        assert!(!graph.is_reachable(0, 0));
    }

    #[test]
    fn reachable_to_excludes_document_format_itself() {
        let mut graph = Graph::new();
        graph.init(2);
        graph.add_edge(1, 0);

        let with_exclusion = graph.reachable_to(0, true, Some(0));
        assert!(!with_exclusion.contains(&0));
        assert!(with_exclusion.contains(&1));
    }

    #[test]
    fn reachable_from_respects_excludes() {
        let mut graph = Graph::new();
        graph.init(3);
        graph.add_edge(0, 1);
        graph.add_edge(0, 2);

        let reachable = graph.reachable_from(0, true, &[1], |_| true);
        assert_eq!(reachable, vec![2]);
    }

    #[test]
    fn out_of_range_indices_return_empty_not_panic() {
        let mut graph = Graph::new();
        graph.init(1);
        assert_eq!(graph.shortest_path(0, 5), Vec::<ArrowId>::new());
        assert_eq!(graph.reachable_from(5, true, &[], |_| true), Vec::new());
        assert_eq!(graph.reachable_to(5, true, None), Vec::new());
    }
}
