//! Build items and load item chains.

use std::collections::HashMap;

use ogp_binary::{Binary, ByteCodec, SharedTypeHandler};
use ogp_storage::ObjectIdSet;
use ogp_types::{Instance, ObjectId};

/// Where a build item is in the Create → Update → Complete sequence.
pub enum BuildState {
    /// Data read, no instance yet.
    Pending,
    /// A blank instance exists but is not registered yet.
    Created(Instance),
    /// The instance the object id stands for. `existed` is set when it was
    /// already registered before this batch created anything.
    Resolved { instance: Instance, existed: bool },
    /// Not loaded; references resolve to the instance, or to null.
    Skipped(Option<Instance>),
}

pub struct BuildItem<C: ByteCodec> {
    pub oid: ObjectId,
    /// Handler and entity data; absent for skip items.
    pub data: Option<(SharedTypeHandler<C>, Binary<C>)>,
    pub state: BuildState,
}

impl<C: ByteCodec> BuildItem<C> {
    pub fn instance(&self) -> Option<&Instance> {
        match &self.state {
            BuildState::Resolved { instance, .. } => Some(instance),
            BuildState::Skipped(instance) => instance.as_ref(),
            BuildState::Pending | BuildState::Created(_) => None,
        }
    }
}

/// Build items of one batch, by object id and in discovery order.
pub struct BuildItems<C: ByteCodec> {
    by_oid: HashMap<ObjectId, usize>,
    items: Vec<BuildItem<C>>,
}

impl<C: ByteCodec> BuildItems<C> {
    pub fn new() -> Self {
        Self {
            by_oid: HashMap::new(),
            items: Vec::new(),
        }
    }

    pub fn contains(&self, oid: ObjectId) -> bool {
        self.by_oid.contains_key(&oid)
    }

    pub fn get(&self, oid: ObjectId) -> Option<&BuildItem<C>> {
        self.by_oid.get(&oid).map(|&i| &self.items[i])
    }

    /// Add an item unless its object id is already present. Returns whether
    /// it was added.
    pub fn put(&mut self, item: BuildItem<C>) -> bool {
        if self.by_oid.contains_key(&item.oid) {
            return false;
        }
        self.by_oid.insert(item.oid, self.items.len());
        self.items.push(item);
        true
    }

    pub fn put_skip(&mut self, oid: ObjectId, instance: Option<Instance>) -> bool {
        self.put(BuildItem {
            oid,
            data: None,
            state: BuildState::Skipped(instance),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildItem<C>> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BuildItem<C>> {
        self.items.iter_mut()
    }

    /// Items from position `start` on, in discovery order.
    pub fn since(&self, start: usize) -> &[BuildItem<C>] {
        &self.items[start.min(self.items.len())..]
    }

    pub fn clear(&mut self) {
        self.by_oid.clear();
        self.items.clear();
    }
}

impl<C: ByteCodec> Default for BuildItems<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object ids still to be read, grouped the way the source wants them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadItemsChain {
    /// One set for the whole request.
    Simple(ObjectIdSet),
    /// One set per channel, selected by `oid & (channels - 1)`.
    ChannelHashing(Vec<ObjectIdSet>),
}

impl LoadItemsChain {
    pub fn for_channels(channel_count: usize) -> Self {
        if channel_count <= 1 {
            Self::Simple(ObjectIdSet::new())
        } else {
            Self::ChannelHashing(vec![ObjectIdSet::new(); channel_count])
        }
    }

    /// Returns `false` if the id was already requested.
    pub fn add(&mut self, oid: ObjectId) -> bool {
        match self {
            Self::Simple(set) => set.insert(oid),
            Self::ChannelHashing(sets) => {
                let channel = oid.channel_index(sets.len());
                sets[channel].insert(oid)
            }
        }
    }

    pub fn contains(&self, oid: ObjectId) -> bool {
        match self {
            Self::Simple(set) => set.contains(&oid),
            Self::ChannelHashing(sets) => sets[oid.channel_index(sets.len())].contains(&oid),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Simple(set) => set.is_empty(),
            Self::ChannelHashing(sets) => sets.iter().all(ObjectIdSet::is_empty),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Simple(set) => set.len(),
            Self::ChannelHashing(sets) => sets.iter().map(ObjectIdSet::len).sum(),
        }
    }

    /// Hand out the requested sets and start over.
    pub fn take(&mut self) -> Vec<ObjectIdSet> {
        match self {
            Self::Simple(set) => vec![std::mem::take(set)],
            Self::ChannelHashing(sets) => sets.iter_mut().map(std::mem::take).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn chains_deduplicate() {
        let mut chain = LoadItemsChain::for_channels(1);
        assert!(chain.add(ObjectId::new(5)));
        assert!(!chain.add(ObjectId::new(5)));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.take(), vec![ObjectIdSet::from([ObjectId::new(5)])]);
        assert!(chain.is_empty());
    }

    #[test]
    fn channel_hashing_groups_by_channel() {
        let mut chain = LoadItemsChain::for_channels(4);
        for oid in [4, 5, 6, 9] {
            chain.add(ObjectId::new(oid));
        }
        let sets = chain.take();
        assert_eq!(sets.len(), 4);
        assert_eq!(sets[0], ObjectIdSet::from([ObjectId::new(4)]));
        assert_eq!(sets[1], ObjectIdSet::from([ObjectId::new(5), ObjectId::new(9)]));
        assert_eq!(sets[2], ObjectIdSet::from([ObjectId::new(6)]));
        assert!(sets[3].is_empty());
    }

    #[test]
    fn duplicate_build_items_are_ignored() {
        let mut items = BuildItems::<ogp_binary::Direct>::new();
        assert!(items.put_skip(ObjectId::new(3), None));
        assert!(!items.put_skip(ObjectId::new(3), None));
        assert_eq!(items.len(), 1);
        assert!(items.get(ObjectId::new(3)).unwrap().instance().is_none());
    }

    proptest! {
        #[test]
        fn every_added_id_is_handed_out_once(ids in proptest::collection::vec(1u64..10_000, 0..64), shift in 0u32..4) {
            let mut chain = LoadItemsChain::for_channels(1 << shift);
            for &id in &ids {
                chain.add(ObjectId::new(id));
            }
            let handed: Vec<ObjectId> = chain.take().into_iter().flatten().collect();
            let mut expected: Vec<ObjectId> = ids.iter().map(|&id| ObjectId::new(id)).collect();
            expected.sort();
            expected.dedup();
            let mut sorted = handed.clone();
            sorted.sort();
            prop_assert_eq!(handed.len(), expected.len());
            prop_assert_eq!(sorted, expected);
            prop_assert!(chain.is_empty());
        }
    }
}
