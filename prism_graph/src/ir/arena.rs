//! Slot arena for IR nodes.
//!
//! Nodes live in a single vector and are addressed by a typed index. Removing
//! a node leaves a tombstone so that an index is never handed out again while
//! any other node might still remember it; indices are only recycled by an
//! explicit [`Arena::compact`], which returns the old-to-new mapping.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe index into an [`Arena`].
///
/// The marker ties the id to the element type so that block ids and node ids
/// cannot be mixed up. The trait impls are written out by hand because derive
/// would require `T` itself to implement them.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Sentinel for "no id".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#INVALID")
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// A growable arena whose slots can be vacated.
///
/// `len` counts live items; `capacity_bound` is one past the highest index
/// ever allocated and is what side tables must be sized to.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            live: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Store `item` in a fresh slot.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.slots.len() as u32;
        self.slots.push(Some(item));
        self.live += 1;
        Id::new(index)
    }

    /// Vacate a slot, returning its item. The index stays reserved.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let taken = self.slots.get_mut(id.as_usize()).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        matches!(self.slots.get(id.as_usize()), Some(Some(_)))
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.slots.get(id.as_usize()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.slots.get_mut(id.as_usize()).and_then(Option::as_mut)
    }

    /// Number of live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the highest index ever handed out.
    #[inline]
    pub fn capacity_bound(&self) -> usize {
        self.slots.len()
    }

    /// The id the next `alloc` will return.
    #[inline]
    pub fn next_id(&self) -> Id<T> {
        Id::new(self.slots.len() as u32)
    }

    /// Live items in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (Id::new(i as u32), item)))
    }

    /// Live ids in index order.
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.iter().map(|(id, _)| id)
    }

    /// Squeeze out vacated slots.
    ///
    /// Returns a map from every old index to its new id (`Id::INVALID` for
    /// vacated slots). Callers are responsible for rewriting any ids they hold.
    pub fn compact(&mut self) -> SecondaryMap<T, Id<T>> {
        let mut remap = SecondaryMap::with_capacity(self.slots.len());
        let old = std::mem::take(&mut self.slots);
        self.slots.reserve(self.live);
        for (i, slot) in old.into_iter().enumerate() {
            if let Some(item) = slot {
                let new_id = Id::new(self.slots.len() as u32);
                self.slots.push(Some(item));
                remap.set(Id::new(i as u32), new_id);
            }
        }
        remap
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        match self.get(id) {
            Some(item) => item,
            None => panic!("arena slot {id:?} is vacant"),
        }
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(item) => item,
            None => panic!("arena slot {id:?} is vacant"),
        }
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Side table keyed by arena ids, grown on demand.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Pre-size the table for ids below `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    #[inline]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<K>) -> Option<&mut V> {
        self.values.get_mut(id.as_usize())
    }

    /// Mutable access that grows the table instead of failing.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        &mut self.values[idx]
    }

    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<K>, &V)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (Id::new(i as u32), v))
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

impl<K, V: Default + Clone> IndexMut<Id<K>> for SecondaryMap<K, V> {
    fn index_mut(&mut self, id: Id<K>) -> &mut Self::Output {
        self.entry(id)
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Dense bit set over small integer indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { words: Vec::new() }
    }

    pub fn with_capacity(bits: usize) -> Self {
        BitSet {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    fn grow(&mut self, bits: usize) {
        let words = bits.div_ceil(64);
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
    }

    /// Set bit `index`; returns `true` if it was previously clear.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        self.grow(index + 1);
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Clear bit `index`; returns `true` if it was set.
    #[inline]
    pub fn remove(&mut self, index: usize) -> bool {
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        match self.words.get_mut(word) {
            Some(w) if *w & mask != 0 => {
                *w &= !mask;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// In-place union; returns `true` if any bit was added.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        self.grow(other.words.len() * 64);
        let mut changed = false;
        for (dst, &src) in self.words.iter_mut().zip(&other.words) {
            let merged = *dst | src;
            changed |= merged != *dst;
            *dst = merged;
        }
        changed
    }

    pub fn intersect_with(&mut self, other: &BitSet) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(wi * 64 + bit)
            })
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(u32);

    #[test]
    fn test_alloc_and_remove_keeps_indices() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        let b = arena.alloc(Item(2));
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(a), Some(Item(1)));
        assert!(!arena.contains(a));
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.capacity_bound(), 2);

        let c = arena.alloc(Item(3));
        assert_ne!(c, a);
        assert_eq!(arena[b], Item(2));
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn test_compact_remaps() {
        let mut arena: Arena<Item> = Arena::new();
        let ids: Vec<_> = (0..5).map(|i| arena.alloc(Item(i))).collect();
        arena.remove(ids[1]);
        arena.remove(ids[3]);

        let remap = arena.compact();
        assert_eq!(arena.capacity_bound(), 3);
        assert_eq!(remap[ids[0]], Id::new(0));
        assert_eq!(remap[ids[2]], Id::new(1));
        assert_eq!(remap[ids[4]], Id::new(2));
        assert!(!remap[ids[1]].is_valid());
        assert_eq!(arena[Id::new(2)], Item(4));
    }

    #[test]
    fn test_iter_skips_vacant() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(0));
        arena.alloc(Item(1));
        arena.remove(a);
        let live: Vec<_> = arena.iter().map(|(_, item)| item.0).collect();
        assert_eq!(live, vec![1]);
    }

    #[test]
    fn test_secondary_map_grows() {
        let mut map: SecondaryMap<Item, u32> = SecondaryMap::new();
        map.set(Id::new(10), 7);
        assert_eq!(map[Id::new(10)], 7);
        assert_eq!(map.get(Id::new(3)), Some(&0));
        assert_eq!(map.get(Id::new(11)), None);
        *map.entry(Id::new(20)) += 1;
        assert_eq!(map[Id::new(20)], 1);
    }

    #[test]
    fn test_bitset_ops() {
        let mut set = BitSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        set.insert(64);
        set.insert(130);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 64, 130]);
        assert!(set.remove(64));
        assert!(!set.contains(64));

        let mut other = BitSet::new();
        other.insert(5);
        assert!(set.union_with(&other));
        assert!(!set.union_with(&other));
        assert_eq!(set.len(), 3);

        set.intersect_with(&other);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![5]);
    }
}
