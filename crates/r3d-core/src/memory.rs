//! External address translation (§4.6).
//!
//! All regions are borrowed, read-only word arrays owned by the host
//! memory system; this module only knows how to turn a 24-bit scene
//! address into an index into the right slice.

use crate::error::{R3dError, Result};

pub const CULLING_LO_WORDS: usize = 1 << 20; // 1M
pub const CULLING_HI_WORDS: usize = 1 << 18; // 256K
pub const POLYGON_RAM_WORDS: usize = 1 << 20; // 1M
pub const VROM_WORDS: usize = 1 << 24; // 16M
pub const TEXTURE_RAM_HALFWORDS: usize = 1 << 22; // 4M

const CULLING_LO_BASE: u32 = 0x0000_0000;
const CULLING_LO_END: u32 = 0x000F_FFFF;
const CULLING_HI_BASE: u32 = 0x0080_0000;
const CULLING_HI_END: u32 = 0x0083_FFFF;
const MODEL_VROM_THRESHOLD: u32 = 0x0010_0000;
const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Borrowed views over the memory regions the core reads but never
/// mutates. Attached once via `Renderer::attach_memory`.
#[derive(Clone, Copy)]
pub struct MemoryViews<'a> {
    pub culling_lo: &'a [u32],
    pub culling_hi: &'a [u32],
    pub polygon_ram: &'a [u32],
    pub vrom: &'a [u32],
    pub texture_ram: &'a [u16],
}

/// Which bank a culling-RAM address resolved to.
pub enum CullingBank<'a> {
    Low(&'a [u32]),
    High(&'a [u32]),
}

/// Which region a model address resolved to.
pub enum ModelRegion<'a> {
    PolygonRam(&'a [u32]),
    Vrom(&'a [u32]),
}

impl<'a> MemoryViews<'a> {
    pub fn new(
        culling_lo: &'a [u32],
        culling_hi: &'a [u32],
        polygon_ram: &'a [u32],
        vrom: &'a [u32],
        texture_ram: &'a [u16],
    ) -> Self {
        Self {
            culling_lo,
            culling_hi,
            polygon_ram,
            vrom,
            texture_ram,
        }
    }

    /// Resolve a culling-RAM address to its bank and word index.
    /// Addresses are masked to 24 bits before the bank test.
    pub fn culling_word(&self, addr: u32) -> Result<u32> {
        let addr = addr & ADDR_MASK;
        let (bank, base) = match addr {
            a if a <= CULLING_LO_END => (CullingBank::Low(self.culling_lo), CULLING_LO_BASE),
            a if (CULLING_HI_BASE..=CULLING_HI_END).contains(&a) => {
                (CullingBank::High(self.culling_hi), CULLING_HI_BASE)
            }
            _ => return Err(R3dError::BadAddress(addr)),
        };
        let index = (addr - base) as usize;
        let slice = match bank {
            CullingBank::Low(s) => s,
            CullingBank::High(s) => s,
        };
        slice
            .get(index)
            .copied()
            .ok_or(R3dError::BadAddress(addr))
    }

    /// Resolve a model address (polygon RAM below 0x100000, VROM at or
    /// above it) to its region and word offset.
    pub fn model_region(&self, addr: u32) -> Result<ModelRegion<'a>> {
        let addr = addr & ADDR_MASK;
        if addr < MODEL_VROM_THRESHOLD {
            let start = addr as usize;
            self.polygon_ram
                .get(start..)
                .map(ModelRegion::PolygonRam)
                .ok_or(R3dError::BadAddress(addr))
        } else {
            let start = (addr - MODEL_VROM_THRESHOLD) as usize;
            self.vrom
                .get(start..)
                .map(ModelRegion::Vrom)
                .ok_or(R3dError::BadAddress(addr))
        }
    }

    /// Read a single polygon-RAM word (used for color-table palette
    /// lookups during material decode).
    pub fn polygon_ram_word(&self, index: u32) -> Result<u32> {
        self.polygon_ram
            .get(index as usize)
            .copied()
            .ok_or(R3dError::BadAddress(index))
    }

    /// Borrow `len` contiguous words starting at a culling-RAM address
    /// (scene nodes, viewport records and pointer lists never span the
    /// low/high bank boundary).
    pub fn culling_slice(&self, addr: u32, len: usize) -> Result<&'a [u32]> {
        let addr = addr & ADDR_MASK;
        let (slice, base) = match addr {
            a if a <= CULLING_LO_END => (self.culling_lo, CULLING_LO_BASE),
            a if (CULLING_HI_BASE..=CULLING_HI_END).contains(&a) => {
                (self.culling_hi, CULLING_HI_BASE)
            }
            _ => return Err(R3dError::BadAddress(addr)),
        };
        let start = (addr - base) as usize;
        slice
            .get(start..start + len)
            .ok_or(R3dError::BadAddress(addr))
    }

    /// Borrow every word remaining in the bank from a culling-RAM
    /// address to its end, capped at `max_len`. Used where the caller
    /// doesn't know exactly how much data follows (matrix tables) and
    /// degrades gracefully rather than failing outright.
    pub fn culling_slice_up_to(&self, addr: u32, max_len: usize) -> Result<&'a [u32]> {
        let addr = addr & ADDR_MASK;
        let (slice, base) = match addr {
            a if a <= CULLING_LO_END => (self.culling_lo, CULLING_LO_BASE),
            a if (CULLING_HI_BASE..=CULLING_HI_END).contains(&a) => {
                (self.culling_hi, CULLING_HI_BASE)
            }
            _ => return Err(R3dError::BadAddress(addr)),
        };
        let start = (addr - base) as usize;
        let available = slice.get(start..).ok_or(R3dError::BadAddress(addr))?;
        Ok(&available[..available.len().min(max_len)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn views() -> (
        Vec<u32>,
        Vec<u32>,
        Vec<u32>,
        Vec<u32>,
        Vec<u16>,
    ) {
        (vec![0u32; 16], vec![0u32; 16], vec![0u32; 16], vec![0u32; 16], vec![0u16; 16])
    }

    #[test]
    fn culling_low_bank_resolves() {
        let (lo, hi, pr, vr, tr) = views();
        let mv = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        assert!(mv.culling_word(0x5).is_ok());
    }

    #[test]
    fn culling_gap_is_bad_address() {
        let (lo, hi, pr, vr, tr) = views();
        let mv = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        assert_eq!(mv.culling_word(0x0020_0000), Err(R3dError::BadAddress(0x0020_0000)));
    }

    #[test]
    fn model_region_splits_at_threshold() {
        let (lo, hi, pr, vr, tr) = views();
        let mv = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        assert!(matches!(mv.model_region(0x5), Ok(ModelRegion::PolygonRam(_))));
        assert!(matches!(mv.model_region(0x0010_0005), Ok(ModelRegion::Vrom(_))));
    }

    #[test]
    fn addresses_are_masked_to_24_bits() {
        let (lo, hi, pr, vr, tr) = views();
        let mv = MemoryViews::new(&lo, &hi, &pr, &vr, &tr);
        // 0xFF000005 masked to 24 bits is 0x5, a valid low-bank address
        assert!(mv.culling_word(0xFF00_0005).is_ok());
    }
}
