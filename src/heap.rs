//! Array-backed 4-ary min-heap of timers ordered by deadline.
//!
//! Every queued [`TimerNode`] carries its own position in the array, updated
//! alongside each swap, so removal of an arbitrary timer is `O(log n)` with no
//! search. A stored position is only trusted after checking both the bound and
//! that the slot still holds the same node.

use std::{sync::Arc, time::Instant};

use crate::timer::TimerNode;

const ARITY: usize = 4;

pub(crate) struct HeapSlot {
    pub(crate) deadline: Instant,
    pub(crate) node: Arc<TimerNode>,
}

pub(crate) struct TimerHeap {
    slots: Vec<HeapSlot>,
}

impl TimerHeap {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Earliest timer.
    pub(crate) fn peek(&self) -> Option<&HeapSlot> {
        self.slots.first()
    }

    /// Insert `node` and return the position it settled at.
    pub(crate) fn push(&mut self, deadline: Instant, node: Arc<TimerNode>) -> usize {
        let index = self.slots.len();

        node.set_index(Some(index));
        self.slots.push(HeapSlot { deadline, node });

        self.sift_up(index)
    }

    /// Verified position of `node`, `None` if it is not in this heap.
    pub(crate) fn position(&self, node: &TimerNode) -> Option<usize> {
        let index = node.index()?;

        match self.slots.get(index) {
            Some(slot) if std::ptr::eq(Arc::as_ptr(&slot.node), node) => Some(index),
            _ => None,
        }
    }

    pub(crate) fn deadline_of(&self, node: &TimerNode) -> Option<Instant> {
        self.position(node).map(|index| self.slots[index].deadline)
    }

    /// Remove `node` wherever it sits. Returns its deadline if it was queued.
    pub(crate) fn remove(&mut self, node: &TimerNode) -> Option<Instant> {
        let index = self.position(node)?;

        self.remove_at(index).map(|slot| slot.deadline)
    }

    /// Remove the earliest timer.
    pub(crate) fn pop_front(&mut self) -> Option<HeapSlot> {
        self.remove_at(0)
    }

    fn remove_at(&mut self, index: usize) -> Option<HeapSlot> {
        if index >= self.slots.len() {
            return None;
        }

        let removed = self.slots.swap_remove(index);
        removed.node.set_index(None);

        if index < self.slots.len() {
            self.slots[index].node.set_index(Some(index));
            // The relocated tail element may belong above or below `index`.
            let index = self.sift_up(index);
            self.sift_down(index);
        }

        Some(removed)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a, b);
        self.slots[a].node.set_index(Some(a));
        self.slots[b].node.set_index(Some(b));
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / ARITY;

            if self.slots[index].deadline >= self.slots[parent].deadline {
                break;
            }

            self.swap(index, parent);
            index = parent;
        }

        index
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.slots.len();

        loop {
            let first = index * ARITY + 1;
            if first >= len {
                break;
            }

            let last = (first + ARITY).min(len);
            let mut child = first;
            for candidate in first + 1..last {
                if self.slots[candidate].deadline < self.slots[child].deadline {
                    child = candidate;
                }
            }

            if self.slots[child].deadline >= self.slots[index].deadline {
                break;
            }

            self.swap(index, child);
            index = child;
        }
    }

    /// Panics unless the heap property holds and every back-pointer matches.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            assert_eq!(slot.node.index(), Some(index), "stale back-pointer");

            if index > 0 {
                let parent = &self.slots[(index - 1) / ARITY];
                assert!(parent.deadline <= slot.deadline, "heap order violated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::timer::send_time;

    fn node() -> Arc<TimerNode> {
        TimerNode::new(Box::new(send_time)).0
    }

    fn drain_deadlines(heap: &mut TimerHeap) -> Vec<Instant> {
        let mut out = vec![];
        while let Some(slot) = heap.pop_front() {
            heap.assert_consistent();
            assert_eq!(slot.node.index(), None);
            out.push(slot.deadline);
        }
        out
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(0);

        for ms in [50u64, 10, 70, 30, 20, 90, 0, 60, 40, 80, 15, 5] {
            heap.push(base + Duration::from_millis(ms), node());
            heap.assert_consistent();
        }

        let deadlines = drain_deadlines(&mut heap);
        assert_eq!(deadlines.len(), 12);
        assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn test_push_reports_front() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(4);

        assert_eq!(heap.push(base + Duration::from_millis(20), node()), 0);
        assert_ne!(heap.push(base + Duration::from_millis(30), node()), 0);
        assert_eq!(heap.push(base + Duration::from_millis(10), node()), 0);
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.peek().map(|s| s.deadline), Some(base + Duration::from_millis(10)));
    }

    #[test]
    fn test_remove_unknown_node() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(4);
        let queued = node();
        heap.push(base, queued.clone());

        let stranger = node();
        assert_eq!(heap.remove(&stranger), None);

        // A back-pointer that aliases a slot owned by another node.
        stranger.set_index(Some(0));
        assert_eq!(heap.remove(&stranger), None);

        stranger.set_index(Some(17));
        assert_eq!(heap.remove(&stranger), None);

        assert_eq!(heap.len(), 1);
        assert_eq!(queued.index(), Some(0));
        heap.assert_consistent();
    }

    #[test]
    fn test_remove_twice() {
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(4);
        let timer = node();
        heap.push(base, timer.clone());
        heap.push(base + Duration::from_millis(1), node());

        assert_eq!(heap.remove(&timer), Some(base));
        assert_eq!(heap.remove(&timer), None);
        assert_eq!(heap.len(), 1);
        heap.assert_consistent();
    }

    #[test]
    fn test_remove_relocates_tail_upward() {
        // Removing from one subtree can move a tail element with an earlier
        // deadline into a deeper position, which must then sift up.
        let base = Instant::now();
        let mut heap = TimerHeap::with_capacity(32);
        let ms = |v: u64| base + Duration::from_millis(v);

        let mut nodes = vec![];
        for v in [0u64, 100, 1, 1, 1, 101, 102, 103, 104, 2, 2, 2, 2, 2, 2, 2, 2, 2] {
            let n = node();
            heap.push(ms(v), n.clone());
            nodes.push(n);
        }
        heap.assert_consistent();

        let victim = heap.slots[5].node.clone();
        assert!(heap.remove(&victim).is_some());
        heap.assert_consistent();

        let deadlines = drain_deadlines(&mut heap);
        assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_fuzz_invariants() {
        for seed in [42u64, 99, 1000] {
            fastrand::seed(seed);

            let base = Instant::now();
            let mut heap = TimerHeap::with_capacity(0);
            let mut live: Vec<Arc<TimerNode>> = vec![];

            for _ in 0..5_000 {
                match fastrand::u8(0..10) {
                    0..=4 => {
                        let n = node();
                        heap.push(base + Duration::from_micros(fastrand::u64(0..1_000)), n.clone());
                        live.push(n);
                    }
                    5..=6 if !live.is_empty() => {
                        let n = live.swap_remove(fastrand::usize(0..live.len()));
                        assert!(heap.remove(&n).is_some());
                        assert_eq!(n.index(), None);
                    }
                    7 if !live.is_empty() => {
                        // reset: remove and reinsert with a new deadline
                        let n = &live[fastrand::usize(0..live.len())];
                        assert!(heap.remove(n).is_some());
                        heap.push(base + Duration::from_micros(fastrand::u64(0..1_000)), n.clone());
                    }
                    8 => {
                        if let Some(slot) = heap.pop_front() {
                            live.retain(|n| !Arc::ptr_eq(n, &slot.node));
                        }
                    }
                    _ => {
                        let stranger = node();
                        assert_eq!(heap.remove(&stranger), None);
                    }
                }

                heap.assert_consistent();
                assert_eq!(heap.len(), live.len());
            }

            let deadlines = drain_deadlines(&mut heap);
            assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
