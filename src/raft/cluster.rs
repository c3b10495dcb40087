use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A node's belief about who is in the cluster and where they listen.
///
/// Keys are node ids, so they are unique by construction. The member count
/// is carried on the wire for compatibility but is always recomputed from
/// the address map when a view is built or adopted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    #[serde(rename = "NumberOfNodes", alias = "memberCount", default)]
    member_count: usize,
    #[serde(rename = "Addresses", alias = "addresses")]
    addresses: BTreeMap<u64, String>,
}

impl ClusterView {
    pub fn new(addresses: BTreeMap<u64, String>) -> Self {
        Self {
            member_count: addresses.len(),
            addresses,
        }
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn addresses(&self) -> &BTreeMap<u64, String> {
        &self.addresses
    }

    pub fn address_of(&self, id: u64) -> Option<&str> {
        self.addresses.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.addresses.contains_key(&id)
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<u64> {
        self.addresses.keys().copied().collect()
    }

    /// Every member except `own_id`, in ascending id order.
    pub fn peers_of(&self, own_id: u64) -> Vec<(u64, String)> {
        self.addresses
            .iter()
            .filter(|(id, _)| **id != own_id)
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }

    /// Every member including `own_id`, in ascending id order.
    pub fn members(&self) -> Vec<(u64, String)> {
        self.addresses
            .iter()
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }

    /// Smallest number of members that forms a strict majority.
    pub fn quorum(&self) -> usize {
        self.member_count / 2 + 1
    }

    pub fn is_quorum(&self, count: usize) -> bool {
        count > self.member_count / 2
    }

    /// Builds the view that keeps `own_id` plus the given survivors.
    ///
    /// Survivors unknown to this view are ignored.
    pub fn retain_survivors(&self, own_id: u64, survivors: &[u64]) -> ClusterView {
        let addresses = self
            .addresses
            .iter()
            .filter(|(id, _)| **id == own_id || survivors.contains(id))
            .map(|(id, addr)| (*id, addr.clone()))
            .collect();
        ClusterView::new(addresses)
    }

    /// Re-derives the member count after deserialisation.
    pub fn normalized(mut self) -> Self {
        self.member_count = self.addresses.len();
        self
    }
}

impl FromIterator<(u64, String)> for ClusterView {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        ClusterView::new(iter.into_iter().collect())
    }
}
