//! Bounded cache of per-leaf histogram arrays.
//!
//! The pool owns every histogram buffer; leaves are bound to buffer slots
//! through a handle map. `get` binds a leaf to a slot, evicting the least
//! recently used binding when the cache is full. `move_to` re-keys a slot
//! from one leaf to another without touching the buffer, which is how the
//! parent's histograms become the larger child's for the subtract trick.

use crate::core::types::DataSize;
use crate::dataset::dataset::{HistEntry, HistogramLayout};
use std::sync::Arc;

/// One leaf's histograms: a flat buffer laid out per [`HistogramLayout`],
/// plus a per-feature splittability flag that children inherit.
#[derive(Debug, Clone)]
pub struct LeafHistogramArray {
    layout: Arc<HistogramLayout>,
    entries: Vec<HistEntry>,
    splittable: Vec<bool>,
}

/// Mutable view of one feature inside a leaf histogram array.
#[derive(Debug)]
pub struct FeatureHistMut<'a> {
    /// Inner feature index
    pub feature: usize,
    /// The feature's stored bin region
    pub entries: &'a mut [HistEntry],
    /// The feature's splittability flag
    pub splittable: &'a mut bool,
}

impl LeafHistogramArray {
    fn new(layout: Arc<HistogramLayout>, num_features: usize) -> Self {
        let total = layout.total_bins;
        LeafHistogramArray {
            layout,
            entries: vec![HistEntry::default(); total],
            splittable: vec![true; num_features],
        }
    }

    /// The full flat buffer.
    pub fn entries(&self) -> &[HistEntry] {
        &self.entries
    }

    /// The full flat buffer, mutable.
    pub fn entries_mut(&mut self) -> &mut [HistEntry] {
        &mut self.entries
    }

    /// One feature's stored region.
    pub fn feature_region(&self, feature: usize) -> &[HistEntry] {
        self.layout.feature_region(feature, &self.entries)
    }

    /// Whether a feature is still splittable at this leaf.
    pub fn is_splittable(&self, feature: usize) -> bool {
        self.splittable[feature]
    }

    /// Mark a feature unsplittable at this leaf.
    pub fn set_unsplittable(&mut self, feature: usize) {
        self.splittable[feature] = false;
    }

    /// Split into disjoint mutable per-feature views.
    ///
    /// `features` must be sorted ascending.
    pub fn features_mut(&mut self, features: &[usize]) -> Vec<FeatureHistMut<'_>> {
        let layout = Arc::clone(&self.layout);
        let mut entry_buf: &mut [HistEntry] = &mut self.entries;
        let mut flag_buf: &mut [bool] = &mut self.splittable;
        let mut entry_consumed = 0usize;
        let mut flag_consumed = 0usize;
        let mut views = Vec::with_capacity(features.len());
        for &f in features {
            let start = layout.offsets[f];
            let rest = std::mem::take(&mut entry_buf)
                .split_at_mut(start - entry_consumed)
                .1;
            let (entries, rest) = rest.split_at_mut(layout.sizes[f]);
            entry_buf = rest;
            entry_consumed = start + layout.sizes[f];

            let rest = std::mem::take(&mut flag_buf).split_at_mut(f - flag_consumed).1;
            let (flag, rest) = rest.split_at_mut(1);
            flag_buf = rest;
            flag_consumed = f + 1;

            views.push(FeatureHistMut {
                feature: f,
                entries,
                splittable: &mut flag[0],
            });
        }
        views
    }
}

/// Bounded leaf-to-histogram cache with strict LRU eviction.
#[derive(Debug)]
pub struct HistogramPool {
    slots: Vec<LeafHistogramArray>,
    /// leaf -> slot, -1 when the leaf has no histograms
    mapper: Vec<i32>,
    /// slot -> leaf, -1 when the slot is free
    inverse_mapper: Vec<i32>,
    last_used_time: Vec<u64>,
    cur_time: u64,
    cache_size: usize,
    total_size: usize,
}

impl HistogramPool {
    /// Create an empty pool; call [`HistogramPool::dynamic_change_size`]
    /// before first use.
    pub fn new() -> Self {
        HistogramPool {
            slots: Vec::new(),
            mapper: Vec::new(),
            inverse_mapper: Vec::new(),
            last_used_time: Vec::new(),
            cur_time: 0,
            cache_size: 0,
            total_size: 0,
        }
    }

    /// Grow or shrink the pool between trees.
    ///
    /// # Arguments
    /// * `layout` - Histogram placement shared with the dataset
    /// * `num_features` - Inner feature count
    /// * `cache_size` - Number of resident leaf histograms
    /// * `total_size` - Number of addressable leaves (`num_leaves`)
    pub fn dynamic_change_size(
        &mut self,
        layout: &Arc<HistogramLayout>,
        num_features: usize,
        cache_size: usize,
        total_size: usize,
    ) {
        if self.slots.len() != cache_size
            || self
                .slots
                .first()
                .map_or(true, |s| s.entries.len() != layout.total_bins)
        {
            self.slots = (0..cache_size)
                .map(|_| LeafHistogramArray::new(Arc::clone(layout), num_features))
                .collect();
        }
        self.cache_size = cache_size;
        self.total_size = total_size;
        self.mapper = vec![-1; total_size];
        self.inverse_mapper = vec![-1; cache_size];
        self.last_used_time = vec![0; cache_size];
        self.cur_time = 0;
    }

    /// Drop all leaf bindings, keep the buffers.
    pub fn reset_map(&mut self) {
        self.mapper.fill(-1);
        self.inverse_mapper.fill(-1);
        self.last_used_time.fill(0);
        self.cur_time = 0;
    }

    /// Bind a leaf to a slot and return `(slot, found)`.
    ///
    /// `found` is true when the leaf already had resident histograms. On a
    /// miss the least recently used binding is evicted, ties broken toward
    /// the smaller leaf id, and the slot's splittability flags reset.
    pub fn get(&mut self, leaf: usize) -> (usize, bool) {
        if self.mapper[leaf] >= 0 {
            let slot = self.mapper[leaf] as usize;
            self.touch(slot);
            return (slot, true);
        }
        let slot = self.victim_slot();
        let old_leaf = self.inverse_mapper[slot];
        if old_leaf >= 0 {
            self.mapper[old_leaf as usize] = -1;
        }
        self.mapper[leaf] = slot as i32;
        self.inverse_mapper[slot] = leaf as i32;
        for flag in &mut self.slots[slot].splittable {
            *flag = true;
        }
        self.touch(slot);
        (slot, false)
    }

    /// Re-key the histograms of `src` to `dst` without copying.
    ///
    /// A `dst` binding that existed before is dropped. When `src` has no
    /// resident histograms this only invalidates `dst`.
    pub fn move_to(&mut self, src: usize, dst: usize) {
        if let Some(&dst_slot) = self.mapper.get(dst).filter(|&&s| s >= 0) {
            self.inverse_mapper[dst_slot as usize] = -1;
            self.mapper[dst] = -1;
        }
        if self.mapper[src] >= 0 {
            let slot = self.mapper[src] as usize;
            self.mapper[src] = -1;
            self.mapper[dst] = slot as i32;
            self.inverse_mapper[slot] = dst as i32;
            self.touch(slot);
        }
    }

    /// Shared access to a slot's histogram array.
    pub fn slot(&self, slot: usize) -> &LeafHistogramArray {
        &self.slots[slot]
    }

    /// Mutable access to a slot's histogram array.
    pub fn slot_mut(&mut self, slot: usize) -> &mut LeafHistogramArray {
        &mut self.slots[slot]
    }

    /// Mutable access to two distinct slots at once.
    pub fn slot_pair_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> (&mut LeafHistogramArray, &mut LeafHistogramArray) {
        assert_ne!(a, b);
        if a < b {
            let (lo, hi) = self.slots.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Number of resident leaf histograms the pool can hold.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Number of currently bound leaves.
    pub fn num_bound(&self) -> usize {
        self.inverse_mapper.iter().filter(|&&l| l >= 0).count()
    }

    fn touch(&mut self, slot: usize) {
        self.cur_time += 1;
        self.last_used_time[slot] = self.cur_time;
    }

    fn victim_slot(&self) -> usize {
        // Free slot first; otherwise the stalest binding, smaller leaf id on
        // equal timestamps so eviction order does not depend on slot layout.
        let mut victim = 0usize;
        let mut victim_key: (u64, DataSize) = (u64::MAX, DataSize::MAX);
        for slot in 0..self.cache_size {
            if self.inverse_mapper[slot] < 0 {
                return slot;
            }
            let key = (self.last_used_time[slot], self.inverse_mapper[slot]);
            if key < victim_key {
                victim_key = key;
                victim = slot;
            }
        }
        victim
    }
}

impl Default for HistogramPool {
    fn default() -> Self {
        HistogramPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(features: usize, bins: usize) -> Arc<HistogramLayout> {
        let size = bins + 2;
        Arc::new(HistogramLayout {
            offsets: (0..features).map(|f| f * size).collect(),
            sizes: vec![size; features],
            total_bins: features * size,
        })
    }

    fn pool(cache: usize, total: usize) -> HistogramPool {
        let mut pool = HistogramPool::new();
        pool.dynamic_change_size(&layout(2, 4), 2, cache, total);
        pool
    }

    #[test]
    fn test_get_reports_found() {
        let mut pool = pool(2, 4);
        let (slot0, found) = pool.get(0);
        assert!(!found);
        let (slot0_again, found) = pool.get(0);
        assert!(found);
        assert_eq!(slot0, slot0_again);
    }

    #[test]
    fn test_lru_eviction_prefers_stalest() {
        let mut pool = pool(2, 4);
        let (slot0, _) = pool.get(0);
        let (_slot1, _) = pool.get(1);
        pool.get(1);
        // Leaf 0 is stalest; leaf 2 takes its slot.
        let (slot2, found) = pool.get(2);
        assert!(!found);
        assert_eq!(slot2, slot0);
        // Leaf 0 is gone now.
        let (_, found) = pool.get(0);
        assert!(!found);
        assert_eq!(pool.num_bound(), 2);
    }

    #[test]
    fn test_move_rebinds_without_copy() {
        let mut pool = pool(2, 4);
        let (slot, _) = pool.get(0);
        pool.slot_mut(slot).entries_mut()[0].sum_gradient = 42.0;
        pool.move_to(0, 3);
        let (slot3, found) = pool.get(3);
        assert!(found);
        assert_eq!(slot3, slot);
        assert_eq!(pool.slot(slot3).entries()[0].sum_gradient, 42.0);
        // The source leaf no longer has histograms.
        let (_, found) = pool.get(0);
        assert!(!found);
    }

    #[test]
    fn test_move_of_absent_leaf_invalidates_dst() {
        let mut pool = pool(2, 4);
        pool.get(3);
        pool.move_to(2, 3);
        let (_, found) = pool.get(3);
        assert!(!found);
    }

    #[test]
    fn test_reset_map_keeps_buffers() {
        let mut pool = pool(2, 4);
        let (slot, _) = pool.get(0);
        pool.slot_mut(slot).entries_mut()[0].sum_gradient = 7.0;
        pool.reset_map();
        assert_eq!(pool.num_bound(), 0);
        let (slot_again, found) = pool.get(0);
        assert!(!found);
        // The buffer itself survived the reset.
        assert_eq!(pool.slot(slot_again).entries()[0].sum_gradient, 7.0);
    }

    #[test]
    fn test_fresh_binding_resets_splittable_flags() {
        let mut pool = pool(2, 4);
        let (slot, _) = pool.get(0);
        pool.slot_mut(slot).set_unsplittable(1);
        assert!(!pool.slot(slot).is_splittable(1));
        pool.get(1);
        pool.get(2);
        let (slot0, found) = pool.get(0);
        assert!(!found);
        assert!(pool.slot(slot0).is_splittable(1));
    }

    #[test]
    fn test_features_mut_disjoint_views() {
        let mut pool = pool(2, 4);
        let (slot, _) = pool.get(0);
        let views = pool.slot_mut(slot).features_mut(&[0, 1]);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].entries.len(), 6);
        assert_eq!(views[1].entries.len(), 6);
    }
}
