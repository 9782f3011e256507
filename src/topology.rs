//! Grouping a posterior sample by topology.
//!
//! Trees are keyed by their topology-only canonical encoding. Groups keep
//! their members in input order, and the groups themselves keep the order in
//! which each topology was first seen, which is what makes the support
//! ranking deterministic under ties.

use crate::canonical::topology_key;
use crate::error::SummaryError;
use crate::tree::Tree;
use indexmap::IndexMap;

/// Posterior trees partitioned by topology, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct TopologyGroups<'a> {
    groups: IndexMap<String, Vec<&'a Tree>>,
    total: usize,
}

/// One topology and the posterior trees sharing it.
#[derive(Debug, Clone, Copy)]
pub struct TopologyClass<'g> {
    pub encoding: &'g str,
    pub members: &'g [&'g Tree],
}

impl<'g> TopologyClass<'g> {
    /// Number of posterior trees with this topology.
    pub fn support(&self) -> usize {
        self.members.len()
    }

    /// First tree seen with this topology.
    pub fn representative(&self) -> &'g Tree {
        self.members[0]
    }
}

/// Groups `trees` by topology in a single pass.
///
/// # Errors
/// Fails on the first tree whose canonical encoding fails (see
/// [`encode`](crate::canonical::encode)).
pub fn group_by_topology<'a, I>(trees: I) -> Result<TopologyGroups<'a>, SummaryError>
where
    I: IntoIterator<Item = &'a Tree>,
{
    let mut grouped = TopologyGroups::default();
    for tree in trees {
        let key = topology_key(tree)?;
        grouped.groups.entry(key).or_default().push(tree);
        grouped.total += 1;
    }
    Ok(grouped)
}

impl<'a> TopologyGroups<'a> {
    /// Number of distinct topologies.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of trees grouped.
    pub fn total_trees(&self) -> usize {
        self.total
    }

    /// Members of the group with the given topology encoding.
    pub fn get(&self, encoding: &str) -> Option<&[&'a Tree]> {
        self.groups.get(encoding).map(Vec::as_slice)
    }

    /// Classes in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = TopologyClass<'_>> + '_ {
        self.groups
            .iter()
            .map(|(encoding, members)| TopologyClass {
                encoding: encoding.as_str(),
                members: members.as_slice(),
            })
    }

    /// Classes by descending support. The sort is stable, so classes with equal
    /// support stay in first-seen order.
    pub fn ranked(&self) -> Vec<TopologyClass<'_>> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|a, b| b.support().cmp(&a.support()));
        ranked
    }
}

/// Fraction of `total` posterior trees covered by `classes`.
pub fn coverage(classes: &[TopologyClass<'_>], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    classes.iter().map(TopologyClass::support).sum::<usize>() as f64 / total as f64
}
