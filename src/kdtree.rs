//! A 3D kd-tree over point locations for knn and radius queries.
//!
//! The tree stores `(position, point index)` pairs in a flat array arranged
//! so that each subslice's middle element is the median along the splitting
//! dimension. Queries return point indices with squared distances; callers
//! filter deleted points and re-query with a larger `k` when needed.

use std::cmp::Ordering;

/// A neighbour candidate: squared distance plus the point index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    /// Squared Euclidean distance to the query location.
    pub distance: f64,
    /// Index of the point in its cloud.
    pub index: u32,
}

/// A static 3D kd-tree.
///
/// # Examples
///
/// ```
/// use laspipe::KdTree;
///
/// let tree = KdTree::build(vec![
///     ([0.0, 0.0, 0.0], 0),
///     ([1.0, 0.0, 0.0], 1),
///     ([5.0, 5.0, 5.0], 2),
/// ]);
/// let neighbors = tree.knn([0.1, 0.0, 0.0], 2);
/// assert_eq!(0, neighbors[0].index);
/// assert_eq!(1, neighbors[1].index);
/// ```
#[derive(Clone, Debug, Default)]
pub struct KdTree {
    nodes: Vec<([f64; 3], u32)>,
}

// Below this size a linear scan beats the recursion.
const LEAF_SIZE: usize = 32;

impl KdTree {
    /// Builds a tree from positions and their point indices.
    pub fn build(mut nodes: Vec<([f64; 3], u32)>) -> KdTree {
        if !nodes.is_empty() {
            arrange(0, &mut nodes);
        }
        KdTree { nodes }
    }

    /// The number of indexed points.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the tree empty?
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The `k` nearest points, sorted by non-decreasing distance.
    pub fn knn(&self, position: [f64; 3], k: usize) -> Vec<Neighbor> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        let mut best = BestSet::new(k);
        search(&self.nodes, &position, 0, &mut best);
        best.into_sorted()
    }

    /// All points within `radius` of the position, sorted by distance.
    pub fn radius(&self, position: [f64; 3], radius: f64, out: &mut Vec<Neighbor>) {
        out.clear();
        if radius <= 0.0 || self.nodes.is_empty() {
            return;
        }
        collect_radius(&self.nodes, &position, 0, radius * radius, out);
        out.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    }
}

fn distance_squared(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

// Rearranges the slice so the middle element is the median along `dim` and
// recurses into both halves on the next dimension.
fn arrange(dim: usize, nodes: &mut [([f64; 3], u32)]) {
    if nodes.len() <= 1 {
        return;
    }
    let middle = nodes.len() / 2;
    select(middle, dim, nodes);
    let next = (dim + 1) % 3;
    arrange(next, &mut nodes[..middle]);
    arrange(next, &mut nodes[middle + 1..]);
}

// Hoare-style selection of the `target`-th element along `dim`.
fn select(target: usize, dim: usize, nodes: &mut [([f64; 3], u32)]) {
    let mut lower = 0;
    let mut upper = nodes.len() - 1;
    loop {
        let pivot_index = lower + (upper - lower) / 2;
        let pivot = nodes[pivot_index].0[dim];
        nodes.swap(pivot_index, upper);
        let mut store = lower;
        for i in lower..upper {
            if nodes[i].0[dim] < pivot {
                nodes.swap(store, i);
                store += 1;
            }
        }
        nodes.swap(store, upper);
        match target.cmp(&store) {
            Ordering::Equal => return,
            Ordering::Less => upper = store - 1,
            Ordering::Greater => lower = store + 1,
        }
    }
}

fn search(nodes: &[([f64; 3], u32)], position: &[f64; 3], dim: usize, best: &mut BestSet) {
    if nodes.len() < LEAF_SIZE {
        for (location, index) in nodes {
            best.offer(distance_squared(location, position), *index);
        }
        return;
    }

    let middle = nodes.len() / 2;
    let (location, index) = nodes[middle];
    best.offer(distance_squared(&location, position), index);

    let next = (dim + 1) % 3;
    let is_left = position[dim] < location[dim];
    let (same_side, other_side) = if is_left {
        (&nodes[..middle], &nodes[middle + 1..])
    } else {
        (&nodes[middle + 1..], &nodes[..middle])
    };
    search(same_side, position, next, best);

    let plane = position[dim] - location[dim];
    if plane * plane < best.worst() {
        search(other_side, position, next, best);
    }
}

fn collect_radius(
    nodes: &[([f64; 3], u32)],
    position: &[f64; 3],
    dim: usize,
    radius_squared: f64,
    out: &mut Vec<Neighbor>,
) {
    if nodes.len() < LEAF_SIZE {
        for (location, index) in nodes {
            let distance = distance_squared(location, position);
            if distance <= radius_squared {
                out.push(Neighbor {
                    distance,
                    index: *index,
                });
            }
        }
        return;
    }

    let middle = nodes.len() / 2;
    let (location, index) = nodes[middle];
    let distance = distance_squared(&location, position);
    if distance <= radius_squared {
        out.push(Neighbor { distance, index });
    }

    let next = (dim + 1) % 3;
    let plane = position[dim] - location[dim];
    if position[dim] < location[dim] {
        collect_radius(&nodes[..middle], position, next, radius_squared, out);
        if plane * plane <= radius_squared {
            collect_radius(&nodes[middle + 1..], position, next, radius_squared, out);
        }
    } else {
        collect_radius(&nodes[middle + 1..], position, next, radius_squared, out);
        if plane * plane <= radius_squared {
            collect_radius(&nodes[..middle], position, next, radius_squared, out);
        }
    }
}

// A bounded max-heap of the best candidates seen so far.
struct BestSet {
    entries: Vec<Neighbor>,
    capacity: usize,
}

impl BestSet {
    fn new(capacity: usize) -> BestSet {
        BestSet {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn worst(&self) -> f64 {
        if self.entries.len() < self.capacity {
            f64::INFINITY
        } else {
            self.entries[0].distance
        }
    }

    fn offer(&mut self, distance: f64, index: u32) {
        if self.entries.len() < self.capacity {
            self.entries.push(Neighbor { distance, index });
            let mut child = self.entries.len() - 1;
            while child > 0 {
                let parent = (child - 1) / 2;
                if self.entries[parent].distance < self.entries[child].distance {
                    self.entries.swap(parent, child);
                    child = parent;
                } else {
                    break;
                }
            }
        } else if distance < self.entries[0].distance {
            self.entries[0] = Neighbor { distance, index };
            self.sift_down();
        }
    }

    fn sift_down(&mut self) {
        let mut parent = 0;
        loop {
            let left = parent * 2 + 1;
            let right = parent * 2 + 2;
            let mut largest = parent;
            if left < self.entries.len()
                && self.entries[left].distance > self.entries[largest].distance
            {
                largest = left;
            }
            if right < self.entries.len()
                && self.entries[right].distance > self.entries[largest].distance
            {
                largest = right;
            }
            if largest == parent {
                return;
            }
            self.entries.swap(parent, largest);
            parent = largest;
        }
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        entries
    }
}
