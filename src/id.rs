use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a logic node owned by a [`LogicEngine`](crate::engine::LogicEngine).
    pub struct NodeId;

    /// Identifies a data link between two node properties.
    pub struct LinkId;
}

/// Stable identifier assigned at creation time. Defines creation order and
/// is the cross-reference key inside saved logic files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn object_ids_order_by_creation() {
        let first = ObjectId(1);
        let second = ObjectId(2);
        assert!(first < second);
    }

    #[test]
    fn removed_node_keys_are_not_reused() {
        let mut nodes: SlotMap<NodeId, &str> = SlotMap::with_key();
        let a = nodes.insert("a");
        nodes.remove(a);
        let b = nodes.insert("b");
        assert_ne!(a, b);
        assert!(nodes.get(a).is_none());
    }
}
