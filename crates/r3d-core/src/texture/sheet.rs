//! Texture Sheet Manager (§4.1).
//!
//! Nine logical 2048x2048 sheets (one per source format, plus a spare)
//! backed by a smaller number of physical GPU texture maps. A map may
//! stack several sheets vertically when the device's reported
//! max-texture-size allows a side bigger than 2048.

use r3d_formats::texel::decode_texel;

use crate::error::{InitError, R3dError, Result};

pub const SHEET_SIDE: u32 = 2048;
pub const TILE_SIZE: u32 = 32;
pub const TILES_PER_SIDE: usize = (SHEET_SIDE / TILE_SIZE) as usize; // 64
pub const MAX_SHEETS: u8 = 9;
const DEFAULT_IDEAL_SHEETS: u8 = 8;

/// Seam for driving GPU texture uploads without a live device; the
/// real implementation wraps `wgpu::Queue::write_texture`, tests use a
/// counting stand-in to assert idempotence.
pub trait TextureUploader {
    fn upload(&mut self, map_index: u8, x: u32, y: u32, w: u32, h: u32, rgba: &[u8]);
}

/// A no-op-tracking uploader used by headless tests.
#[derive(Debug, Default)]
pub struct CountingUploader {
    pub upload_count: u32,
    pub last: Option<(u8, u32, u32, u32, u32)>,
}

impl TextureUploader for CountingUploader {
    fn upload(&mut self, map_index: u8, x: u32, y: u32, w: u32, h: u32, _rgba: &[u8]) {
        self.upload_count += 1;
        self.last = Some((map_index, x, y, w, h));
    }
}

/// wgpu-backed uploader used in production. Every physical map is one
/// array layer of a single array texture, since `resolve_layout` always
/// gives every map the same side.
pub struct WgpuUploader<'a> {
    pub queue: &'a wgpu::Queue,
    pub array_texture: &'a wgpu::Texture,
}

impl<'a> TextureUploader for WgpuUploader<'a> {
    fn upload(&mut self, map_index: u8, x: u32, y: u32, w: u32, h: u32, rgba: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.array_texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x,
                    y,
                    z: map_index as u32,
                },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w * 4),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileGrid {
    /// -1 means "undefined".
    format: i16,
    width: i16,
    height: i16,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            format: -1,
            width: -1,
            height: -1,
        }
    }
}

/// One logical 2048x2048 sheet and its validity grid.
struct Sheet {
    map_index: u8,
    /// Vertical pixel offset of this sheet within its physical map.
    y_offset_in_map: u32,
    grid: Box<[[TileGrid; TILES_PER_SIDE]; TILES_PER_SIDE]>,
}

impl Sheet {
    fn new(map_index: u8, y_offset_in_map: u32) -> Self {
        Self {
            map_index,
            y_offset_in_map,
            grid: Box::new([[TileGrid::default(); TILES_PER_SIDE]; TILES_PER_SIDE]),
        }
    }
}

/// One physical GPU texture map, `side` texels square, stacking
/// `side / 2048` logical sheets.
struct PhysicalMap {
    side: u32,
}

pub struct TextureSheetManager {
    maps: Vec<PhysicalMap>,
    sheets: Vec<Sheet>,
    scratch: Vec<u8>,
}

impl TextureSheetManager {
    pub fn new() -> Self {
        Self {
            maps: Vec::new(),
            sheets: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Side length, in texels, shared by every physical map — the
    /// array-texture size the renderer must allocate to back `decode`.
    pub fn map_side(&self) -> u32 {
        self.maps.first().map(|m| m.side).unwrap_or(SHEET_SIDE)
    }

    /// Which logical sheet index (and thus array layer) a format
    /// selects, mirroring the same `fmt & 7` rule `decode` uses.
    pub fn sheet_index_for_format(&self, fmt: u8) -> Option<u8> {
        self.sheet_for_format(fmt).map(|i| i as u8)
    }

    /// Negotiate physical-map layout at init. Halves `map_extent`
    /// (in units of `SHEET_SIDE`) until `ideal_sheets` logical sheets
    /// fit within `max_maps_hint` maps of side `<= max_size_hint`, or
    /// fails if even a single 2048x2048 map cannot be represented.
    pub fn resolve_layout(
        &mut self,
        max_maps_hint: u8,
        max_size_hint: u32,
        ideal_sheets: Option<u8>,
    ) -> Result<()> {
        let ideal_sheets = ideal_sheets.unwrap_or(DEFAULT_IDEAL_SHEETS).min(MAX_SHEETS);
        let max_extent_mult = (max_size_hint / SHEET_SIDE).max(1);

        let mut extent_mult = max_extent_mult;
        loop {
            let side = SHEET_SIDE * extent_mult;
            if side < SHEET_SIDE {
                return Err(R3dError::Init(InitError::NoTextureMap));
            }
            let sheets_per_map = extent_mult.max(1);
            let maps_needed = (ideal_sheets as u32).div_ceil(sheets_per_map);
            if maps_needed <= max_maps_hint as u32 {
                self.maps = (0..maps_needed).map(|_| PhysicalMap { side }).collect();
                self.sheets.clear();
                let mut remaining = ideal_sheets as u32;
                for (map_index, _) in self.maps.iter().enumerate() {
                    let mut slot = 0u32;
                    while slot < sheets_per_map && remaining > 0 {
                        self.sheets
                            .push(Sheet::new(map_index as u8, slot * SHEET_SIDE));
                        slot += 1;
                        remaining -= 1;
                    }
                }
                return Ok(());
            }
            if extent_mult == 1 {
                return Err(R3dError::Init(InitError::NoTextureMap));
            }
            extent_mult /= 2;
        }
    }

    fn sheet_for_format(&self, fmt: u8) -> Option<usize> {
        let idx = fmt as usize & 7;
        if idx < self.sheets.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// Decode a region of `fmt`-formatted source texels from
    /// `source_words` (row-major, `w` wide) into the owning sheet,
    /// uploading only when the tile grid doesn't already record this
    /// exact (fmt, w, h) at (x, y).
    pub fn decode(
        &mut self,
        fmt: u8,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        source_words: &[u16],
        uploader: &mut dyn TextureUploader,
    ) {
        let x = x.min(SHEET_SIDE - 1);
        let y = y.min(SHEET_SIDE - 1);
        if w == 0 || h == 0 || w > 1024 || h > 1024 {
            return;
        }
        if x + w > SHEET_SIDE || y + h > SHEET_SIDE {
            return;
        }
        let Some(sheet_idx) = self.sheet_for_format(fmt) else {
            return;
        };

        let tx0 = (x / TILE_SIZE) as usize;
        let ty0 = (y / TILE_SIZE) as usize;
        let sheet = &self.sheets[sheet_idx];
        let already_decoded = sheet.grid[ty0][tx0]
            == (TileGrid {
                format: fmt as i16,
                width: w as i16,
                height: h as i16,
            });
        if already_decoded {
            return;
        }

        self.scratch.clear();
        self.scratch.resize((w * h * 4) as usize, 0);
        for row in 0..h {
            for col in 0..w {
                let src = source_words
                    .get((row * w + col) as usize)
                    .copied()
                    .unwrap_or(0);
                let rgba = decode_texel(fmt, src);
                let dst = ((row * w + col) * 4) as usize;
                self.scratch[dst..dst + 4].copy_from_slice(&rgba);
            }
        }

        let sheet = &self.sheets[sheet_idx];
        uploader.upload(
            sheet.map_index,
            x,
            sheet.y_offset_in_map + y,
            w,
            h,
            &self.scratch,
        );

        let tx1 = ((x + w - 1) / TILE_SIZE) as usize;
        let ty1 = ((y + h - 1) / TILE_SIZE) as usize;
        let sheet = &mut self.sheets[sheet_idx];
        let entry = TileGrid {
            format: fmt as i16,
            width: w as i16,
            height: h as i16,
        };
        for ty in ty0..=ty1.min(TILES_PER_SIDE - 1) {
            for tx in tx0..=tx1.min(TILES_PER_SIDE - 1) {
                sheet.grid[ty][tx] = entry;
            }
        }
    }

    /// Invalidate decoded-ness for a region; called whenever the host
    /// uploads new source texture data covering it. `fmt` selects the
    /// sheet, matching the convention `upload_textures` uses in `lib.rs`.
    pub fn invalidate(&mut self, fmt: u8, x: u32, y: u32, w: u32, h: u32) {
        let Some(sheet_idx) = self.sheet_for_format(fmt) else {
            return;
        };
        let x = x.min(SHEET_SIDE - 1);
        let y = y.min(SHEET_SIDE - 1);
        let w = w.max(1);
        let h = h.max(1);
        let tx0 = (x / TILE_SIZE) as usize;
        let ty0 = (y / TILE_SIZE) as usize;
        let tx1 = (((x + w - 1) / TILE_SIZE) as usize).min(TILES_PER_SIDE - 1);
        let ty1 = (((y + h - 1) / TILE_SIZE) as usize).min(TILES_PER_SIDE - 1);
        let sheet = &mut self.sheets[sheet_idx];
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                sheet.grid[ty][tx] = TileGrid::default();
            }
        }
    }
}

impl Default for TextureSheetManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_mgr() -> TextureSheetManager {
        let mut mgr = TextureSheetManager::new();
        mgr.resolve_layout(9, 2048, Some(8)).unwrap();
        mgr
    }

    #[test]
    fn resolve_layout_allocates_one_map_per_sheet_at_min_extent() {
        let mgr = small_mgr();
        assert_eq!(mgr.sheet_count(), 8);
        assert_eq!(mgr.map_count(), 8);
    }

    #[test]
    fn resolve_layout_stacks_sheets_when_extent_allows() {
        let mut mgr = TextureSheetManager::new();
        mgr.resolve_layout(1, 2048 * 8, Some(8)).unwrap();
        assert_eq!(mgr.map_count(), 1);
        assert_eq!(mgr.sheet_count(), 8);
    }

    #[test]
    fn resolve_layout_fails_below_one_sheet_worth() {
        let mut mgr = TextureSheetManager::new();
        let err = mgr.resolve_layout(0, 2048, Some(8));
        assert!(err.is_err());
    }

    #[test]
    fn decode_is_idempotent_without_invalidate() {
        let mut mgr = small_mgr();
        let mut up = CountingUploader::default();
        let words = vec![0xFFFFu16; 64 * 64];
        mgr.decode(7, 0, 0, 64, 64, &words, &mut up);
        assert_eq!(up.upload_count, 1);
        mgr.decode(7, 0, 0, 64, 64, &words, &mut up);
        assert_eq!(up.upload_count, 1);
    }

    #[test]
    fn invalidate_forces_redecode() {
        let mut mgr = small_mgr();
        let mut up = CountingUploader::default();
        let words = vec![0xFFFFu16; 64 * 64];
        mgr.decode(7, 0, 0, 64, 64, &words, &mut up);
        mgr.invalidate(7, 0, 0, 32, 32);
        mgr.decode(7, 0, 0, 64, 64, &words, &mut up);
        assert_eq!(up.upload_count, 2);
    }

    #[test]
    fn oversized_region_is_rejected_without_panicking() {
        let mut mgr = small_mgr();
        let mut up = CountingUploader::default();
        mgr.decode(0, 2000, 2000, 64, 64, &[], &mut up);
        assert_eq!(up.upload_count, 0);
    }
}
