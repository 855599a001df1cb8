//! Storage-rent projection surface. The trie tracks a per-node "last rent
//! paid" timestamp through mutations; an external tracker consumes the
//! projections below at read and rewrite time.

use crate::node::{Node, NodeVersion};

/// Sentinel for "unset / not applicable". Kept in memory as `None`, exposed
/// as `-1` at the accessor, and never written into a v2 encoding.
pub const UNSET_RENT_TIMESTAMP: i64 = -1;

/// Timestamp `0` anchors the rent epoch; rent is never collected at the
/// unset sentinel itself.
pub const RENT_EPOCH_ANCHOR: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentRead {
    pub value_length: usize,
    pub last_rent_paid_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentRewrite {
    pub old_value_length: usize,
    pub old_last_rent_paid_time: i64,
    pub new_value_length: usize,
}

/// External rent tracker fed by the adapter. A `-1` timestamp means "new
/// node": the tracker charges nothing for it.
pub trait RentTracker {
    fn on_read(&mut self, read: RentRead);

    fn on_rewrite(&mut self, rewrite: RentRewrite);
}

impl Node {
    /// A node that has never paid rent: anything below v2, or a v2 node
    /// whose timestamp is unset.
    pub fn is_new(&self) -> bool {
        self.version() != NodeVersion::V2 || self.rent_timestamp().is_none()
    }

    pub fn rent_read(&self) -> RentRead {
        RentRead {
            value_length: self.value_length().unwrap_or(0),
            last_rent_paid_time: self.last_rent_paid_time(),
        }
    }
}

pub fn report_read<T: RentTracker>(node: &Node, tracker: &mut T) {
    tracker.on_read(node.rent_read());
}

pub fn report_rewrite<T: RentTracker>(previous: &Node, new_value_length: usize, tracker: &mut T) {
    tracker.on_rewrite(RentRewrite {
        old_value_length: previous.value_length().unwrap_or(0),
        old_last_rent_paid_time: previous.last_rent_paid_time(),
        new_value_length,
    });
}

#[cfg(test)]
mod tests {
    use super::{report_read, report_rewrite, RentRead, RentRewrite, RentTracker};
    use crate::node::{Node, NodeReference, NodeValue, NodeVersion};
    use crate::path::KeySlice;

    #[derive(Default)]
    struct RecordingTracker {
        reads: Vec<RentRead>,
        rewrites: Vec<RentRewrite>,
    }

    impl RentTracker for RecordingTracker {
        fn on_read(&mut self, read: RentRead) {
            self.reads.push(read);
        }

        fn on_rewrite(&mut self, rewrite: RentRewrite) {
            self.rewrites.push(rewrite);
        }
    }

    fn stamped(value: &[u8], rent: Option<i64>) -> Node {
        Node::new(
            KeySlice::empty(),
            NodeValue::from_bytes(value),
            NodeReference::empty(),
            NodeReference::empty(),
            NodeVersion::for_rent(rent),
            rent,
        )
        .unwrap()
    }

    #[test]
    fn nodes_below_v2_are_new() {
        assert!(stamped(b"v", None).is_new());
        assert!(!stamped(b"v", Some(1000)).is_new());
    }

    #[test]
    fn read_projection_carries_length_and_sentinel() {
        let mut tracker = RecordingTracker::default();
        report_read(&stamped(b"abc", None), &mut tracker);
        assert_eq!(
            tracker.reads,
            vec![RentRead {
                value_length: 3,
                last_rent_paid_time: -1
            }]
        );
    }

    #[test]
    fn rewrite_projection_pairs_old_state_with_new_length() {
        let mut tracker = RecordingTracker::default();
        report_rewrite(&stamped(b"abc", Some(2000)), 10, &mut tracker);
        assert_eq!(
            tracker.rewrites,
            vec![RentRewrite {
                old_value_length: 3,
                old_last_rent_paid_time: 2000,
                new_value_length: 10
            }]
        );
    }
}
