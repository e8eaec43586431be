use core::ops::{Index, IndexMut};

/// One of the two physical CAN controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanNode {
    Node0 = 0,
    Node1 = 1,
}

impl CanNode {
    /// Configuration order. Filter banks of `Node0` come first.
    pub const ALL: [CanNode; 2] = [CanNode::Node0, CanNode::Node1];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Fixed per-node arena, built once from configuration and never resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerNode<T>([T; 2]);

impl<T> PerNode<T> {
    pub const fn new(node0: T, node1: T) -> Self {
        PerNode([node0, node1])
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanNode, &T)> {
        CanNode::ALL.into_iter().zip(self.0.iter())
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PerNode<U> {
        PerNode(self.0.map(f))
    }
}

impl<T: Clone> PerNode<T> {
    pub fn splat(value: T) -> Self {
        PerNode([value.clone(), value])
    }
}

impl<T> Index<CanNode> for PerNode<T> {
    type Output = T;

    fn index(&self, node: CanNode) -> &T {
        &self.0[node.index()]
    }
}

impl<T> IndexMut<CanNode> for PerNode<T> {
    fn index_mut(&mut self, node: CanNode) -> &mut T {
        &mut self.0[node.index()]
    }
}
