//! Texture-Reference Set (§4.2): per-cached-model dedup of the
//! textures it samples, so they can be decoded lazily the first time
//! the model draws in a frame.

use hashbrown::HashSet;
use r3d_formats::texref::TextureRef;

use crate::texture::sheet::{TextureSheetManager, TextureUploader, SHEET_SIDE};

const INLINE_CAPACITY: usize = 12;
const INITIAL_HASH_CAPACITY: usize = 47;

fn next_hash_capacity(current: usize) -> usize {
    if current < 89 {
        89
    } else {
        2 * current + 1
    }
}

enum Storage {
    Inline([Option<u32>; INLINE_CAPACITY]),
    Hash {
        set: HashSet<u32>,
        capacity: usize,
    },
}

/// Deduplicated set of packed texture references. Starts as a small
/// inline array and promotes to a hash set once it overflows.
pub struct TextureRefSet {
    storage: Storage,
    len: usize,
}

impl TextureRefSet {
    pub fn new() -> Self {
        Self {
            storage: Storage::Inline([None; INLINE_CAPACITY]),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, r: TextureRef) -> bool {
        let bits = r.pack();
        match &self.storage {
            Storage::Inline(arr) => arr[..self.len].iter().any(|v| *v == Some(bits)),
            Storage::Hash { set, .. } => set.contains(&bits),
        }
    }

    /// Insert `r` if absent. Returns `true` if it was newly inserted.
    pub fn add(&mut self, r: TextureRef) -> bool {
        let bits = r.pack();
        if self.contains(r) {
            return false;
        }
        match &mut self.storage {
            Storage::Inline(arr) => {
                if self.len < INLINE_CAPACITY {
                    arr[self.len] = Some(bits);
                    self.len += 1;
                    true
                } else {
                    self.promote_to_hash();
                    self.insert_hash(bits);
                    true
                }
            }
            Storage::Hash { .. } => {
                self.insert_hash(bits);
                self.maybe_grow();
                true
            }
        }
    }

    fn insert_hash(&mut self, bits: u32) {
        if let Storage::Hash { set, .. } = &mut self.storage {
            set.insert(bits);
            self.len = set.len();
        }
    }

    fn maybe_grow(&mut self) {
        if let Storage::Hash { set, capacity } = &mut self.storage {
            if set.len() as f64 / *capacity as f64 >= 1.0 {
                *capacity = next_hash_capacity(*capacity);
                set.reserve(*capacity);
            }
        }
    }

    fn promote_to_hash(&mut self) {
        let Storage::Inline(arr) = &self.storage else {
            return;
        };
        let mut set = HashSet::with_capacity(INITIAL_HASH_CAPACITY);
        for v in arr[..self.len].iter().flatten() {
            set.insert(*v);
        }
        self.storage = Storage::Hash {
            set,
            capacity: INITIAL_HASH_CAPACITY,
        };
    }

    /// Remove `r` if present; demotes back to inline storage once the
    /// hash set shrinks to the inline capacity.
    pub fn remove(&mut self, r: TextureRef) {
        let bits = r.pack();
        match &mut self.storage {
            Storage::Inline(arr) => {
                if let Some(pos) = arr[..self.len].iter().position(|v| *v == Some(bits)) {
                    arr[pos] = arr[self.len - 1];
                    arr[self.len - 1] = None;
                    self.len -= 1;
                }
            }
            Storage::Hash { set, .. } => {
                set.remove(&bits);
                self.len = set.len();
                if self.len <= INLINE_CAPACITY {
                    self.demote_to_inline();
                }
            }
        }
    }

    fn demote_to_inline(&mut self) {
        let Storage::Hash { set, .. } = &self.storage else {
            return;
        };
        let mut arr = [None; INLINE_CAPACITY];
        for (slot, bits) in arr.iter_mut().zip(set.iter()) {
            *slot = Some(*bits);
        }
        self.storage = Storage::Inline(arr);
    }

    pub fn iter(&self) -> impl Iterator<Item = TextureRef> + '_ {
        let inline_iter = match &self.storage {
            Storage::Inline(arr) => Some(arr[..self.len].iter().flatten().copied()),
            Storage::Hash { .. } => None,
        };
        let hash_iter = match &self.storage {
            Storage::Hash { set, .. } => Some(set.iter().copied()),
            Storage::Inline(_) => None,
        };
        inline_iter
            .into_iter()
            .flatten()
            .chain(hash_iter.into_iter().flatten())
            .map(TextureRef::unpack)
    }

    /// Decode every referenced region against `mgr`, reading source
    /// texels from the flat 2048x2048 `texture_ram` plane.
    pub fn decode_all(
        &self,
        mgr: &mut TextureSheetManager,
        texture_ram: &[u16],
        uploader: &mut dyn TextureUploader,
    ) {
        let mut scratch = Vec::new();
        for r in self.iter() {
            let (x, y, w, h) = (r.x as u32, r.y as u32, r.w as u32, r.h as u32);
            scratch.clear();
            scratch.reserve((w * h) as usize);
            for row in 0..h {
                let base = ((y + row) * SHEET_SIDE + x) as usize;
                match texture_ram.get(base..base + w as usize) {
                    Some(slice) => scratch.extend_from_slice(slice),
                    None => scratch.extend(std::iter::repeat(0u16).take(w as usize)),
                }
            }
            mgr.decode(r.fmt, x, y, w, h, &scratch, uploader);
        }
    }
}

impl Default for TextureRefSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(seed: u16) -> TextureRef {
        TextureRef::new(0, 32 * seed, 0, 32, 32)
    }

    #[test]
    fn add_then_contains() {
        let mut set = TextureRefSet::new();
        assert!(set.add(r(1)));
        assert!(set.contains(r(1)));
        assert!(!set.contains(r(2)));
    }

    #[test]
    fn duplicate_add_is_noop() {
        let mut set = TextureRefSet::new();
        assert!(set.add(r(1)));
        assert!(!set.add(r(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn promotes_past_inline_capacity() {
        let mut set = TextureRefSet::new();
        for i in 0..20u16 {
            set.add(r(i));
        }
        assert_eq!(set.len(), 20);
        for i in 0..20u16 {
            assert!(set.contains(r(i)));
        }
    }

    #[test]
    fn remove_demotes_back_to_inline() {
        let mut set = TextureRefSet::new();
        for i in 0..20u16 {
            set.add(r(i));
        }
        for i in 0..15u16 {
            set.remove(r(i));
        }
        assert_eq!(set.len(), 5);
        for i in 15..20u16 {
            assert!(set.contains(r(i)));
        }
    }

    #[test]
    fn next_capacity_formula_matches_growth_sequence() {
        assert_eq!(next_hash_capacity(47), 89);
        assert_eq!(next_hash_capacity(89), 179);
        assert_eq!(next_hash_capacity(179), 359);
    }
}
