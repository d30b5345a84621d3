use std::collections::{vec_deque, VecDeque};

/// An owned FIFO of segment nodes. Every queue in a session is one of
/// these; moving a node between queues is an ownership transfer.
pub struct NodeQueue<T> {
    nodes: VecDeque<T>,
}

impl<T> NodeQueue<T> {
    #[inline]
    fn check_rep(&self) {}

    #[must_use]
    pub fn new() -> Self {
        let this = NodeQueue {
            nodes: VecDeque::new(),
        };
        this.check_rep();
        this
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push_back(&mut self, node: T) {
        self.nodes.push_back(node);
        self.check_rep();
    }

    pub fn push_front(&mut self, node: T) {
        self.nodes.push_front(node);
        self.check_rep();
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let node = self.nodes.pop_front();
        self.check_rep();
        node
    }

    /// Removes and returns the first node matching `pred`, keeping the
    /// order of the others.
    pub fn remove_where<F>(&mut self, pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let at = self.nodes.iter().position(pred)?;
        let node = self.nodes.remove(at);
        self.check_rep();
        node
    }

    #[must_use]
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn iter_mut(&mut self) -> vec_deque::IterMut<'_, T> {
        self.nodes.iter_mut()
    }
}

impl<T> Default for NodeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
