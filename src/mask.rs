//! Compact bitset over component type ids, used as the archetype key.

use {crate::registry::ComponentId, smallvec::SmallVec};

/// Immutable bitset over component type ids.
///
/// Equality and hash are defined over set bits; trailing zero words are
/// trimmed so two masks with identical bits always compare and hash equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask {
    words: SmallVec<[u64; 2]>,
}

impl ComponentMask {
    /// Mask with no bits set.
    pub fn empty() -> Self {
        ComponentMask::default()
    }

    /// Mask with exactly the given ids set.
    pub fn from_ids(ids: &[ComponentId]) -> Self {
        let mut mask = ComponentMask::empty();
        for id in ids {
            mask.insert(*id);
        }
        mask
    }

    /// Copy of this mask with `id` set.
    pub fn with(&self, id: ComponentId) -> Self {
        let mut mask = self.clone();
        mask.insert(id);
        mask
    }

    /// Copy of this mask with `id` cleared.
    pub fn without(&self, id: ComponentId) -> Self {
        let mut mask = self.clone();
        mask.remove(id);
        mask
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        let (word, bit) = split(id);
        self.words.get(word).map_or(false, |w| w & bit != 0)
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains_all(&self, other: &ComponentMask) -> bool {
        other
            .words
            .iter()
            .enumerate()
            .all(|(i, w)| self.words.get(i).map_or(*w == 0, |s| s & w == *w))
    }

    /// True when at least one bit is set in both masks.
    pub fn intersects(&self, other: &ComponentMask) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// True when no bit of `other` is set in `self`.
    pub fn contains_none(&self, other: &ComponentMask) -> bool {
        !self.intersects(other)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate set bits in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            let mut word = *word;
            std::iter::from_fn(move || {
                if word == 0 {
                    None
                } else {
                    let bit = word.trailing_zeros();
                    word &= word - 1;
                    Some(ComponentId::new(i as u32 * 64 + bit))
                }
            })
        })
    }

    pub(crate) fn insert(&mut self, id: ComponentId) {
        let (word, bit) = split(id);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= bit;
    }

    pub(crate) fn remove(&mut self, id: ComponentId) {
        let (word, bit) = split(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !bit;
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

fn split(id: ComponentId) -> (usize, u64) {
    let index = id.index();
    (index / 64, 1u64 << (index % 64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> ComponentId {
        ComponentId::new(index)
    }

    #[test]
    fn set_and_contains() {
        let mask = ComponentMask::empty().with(id(3)).with(id(70));
        assert!(mask.contains(id(3)));
        assert!(mask.contains(id(70)));
        assert!(!mask.contains(id(4)));
    }

    #[test]
    fn equality_ignores_trailing_words() {
        let grown = ComponentMask::empty().with(id(100)).without(id(100));
        assert_eq!(grown, ComponentMask::empty());

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let hash = |mask: &ComponentMask| {
            let mut hasher = DefaultHasher::new();
            mask.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&grown), hash(&ComponentMask::empty()));
    }

    #[test]
    fn contains_all_holds_for_empty_mask() {
        let mask = ComponentMask::empty().with(id(1));
        assert!(mask.contains_all(&ComponentMask::empty()));
        assert!(ComponentMask::empty().contains_all(&ComponentMask::empty()));
    }

    #[test]
    fn intersects_and_none() {
        let a = ComponentMask::from_ids(&[id(1), id(65)]);
        let b = ComponentMask::from_ids(&[id(65)]);
        let c = ComponentMask::from_ids(&[id(2)]);

        assert!(a.intersects(&b));
        assert!(a.contains_none(&c));
        assert!(!a.contains_all(&c));
        assert!(a.contains_all(&b));
    }

    #[test]
    fn iter_yields_ascending_ids() {
        let mask = ComponentMask::from_ids(&[id(65), id(0), id(7)]);
        let ids: Vec<usize> = mask.iter().map(|id| id.index()).collect();
        assert_eq!(ids, vec![0, 7, 65]);
    }
}
