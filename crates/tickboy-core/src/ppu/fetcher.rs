//! Background/window tile fetcher and the pixel FIFO it feeds.
//!
//! The fetcher walks GetTile -> DataLow -> DataHigh at two dots per phase,
//! then retries Push every dot until the FIFO has room for eight more
//! pixels. Sprite rows overlapping the tile are fetched alongside and mixed
//! in at push time, so the FIFO only ever holds final colors.

use super::{DMG_PALETTE, Ppu, Sprite};

const FIFO_CAPACITY: usize = 16;
/// Sprites mixed into a single 8-pixel push.
const SPRITES_PER_PUSH: usize = 3;

// Tile map and tile data offsets within a VRAM bank
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_SIGNED_BASE: usize = 0x0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum Phase {
    #[default]
    GetTile,
    DataLow,
    DataHigh,
    Push,
}

#[derive(Debug, Clone, Copy, Default)]
struct SpriteRow {
    sprite: Sprite,
    lo: u8,
    hi: u8,
}

#[derive(Debug, Clone, Default)]
pub(super) struct Fetcher {
    phase: Phase,
    ticks: u8,
    /// Tile column relative to the line (or window) start
    tile_x: u8,
    window: bool,
    /// Screen X of the first pixel of the tile being fetched
    push_x: i16,
    tile_index: u8,
    attr: u8,
    lo: u8,
    hi: u8,
    sprites: [SpriteRow; SPRITES_PER_PUSH],
    sprite_count: usize,
}

impl Fetcher {
    pub(super) fn restart(&mut self, window: bool, push_x: i16) {
        *self = Fetcher {
            window,
            push_x,
            ..Fetcher::default()
        };
    }
}

/// Fixed-capacity ring of resolved 0x00RRGGBB pixels.
#[derive(Debug, Clone)]
pub(super) struct PixelFifo {
    buf: [u32; FIFO_CAPACITY],
    head: usize,
    len: usize,
}

impl Default for PixelFifo {
    fn default() -> Self {
        Self {
            buf: [0; FIFO_CAPACITY],
            head: 0,
            len: 0,
        }
    }
}

impl PixelFifo {
    pub(super) fn len(&self) -> usize {
        self.len
    }

    pub(super) fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn push(&mut self, color: u32) {
        debug_assert!(self.len < FIFO_CAPACITY);
        self.buf[(self.head + self.len) % FIFO_CAPACITY] = color;
        self.len += 1;
    }

    pub(super) fn pop(&mut self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        let color = self.buf[self.head];
        self.head = (self.head + 1) % FIFO_CAPACITY;
        self.len -= 1;
        Some(color)
    }
}

impl Ppu {
    /// Advance the fetcher by one dot.
    pub(super) fn fetch_step(&mut self) {
        if self.fetcher.phase != Phase::Push {
            self.fetcher.ticks += 1;
            if self.fetcher.ticks < 2 {
                return;
            }
            self.fetcher.ticks = 0;
        }
        match self.fetcher.phase {
            Phase::GetTile => {
                self.fetch_tile_index();
                self.select_sprites();
                self.fetcher.phase = Phase::DataLow;
            }
            Phase::DataLow => {
                self.fetcher.lo = self.vram[self.tile_bank()][self.tile_row_addr()];
                for i in 0..self.fetcher.sprite_count {
                    let (bank, addr) = self.sprite_row_addr(&self.fetcher.sprites[i].sprite);
                    self.fetcher.sprites[i].lo = self.vram[bank][addr];
                }
                self.fetcher.phase = Phase::DataHigh;
            }
            Phase::DataHigh => {
                self.fetcher.hi = self.vram[self.tile_bank()][self.tile_row_addr() + 1];
                for i in 0..self.fetcher.sprite_count {
                    let (bank, addr) = self.sprite_row_addr(&self.fetcher.sprites[i].sprite);
                    self.fetcher.sprites[i].hi = self.vram[bank][addr + 1];
                }
                self.fetcher.phase = Phase::Push;
            }
            Phase::Push => {
                if self.fifo.len() <= 8 {
                    self.push_pixels();
                    self.fetcher.tile_x = self.fetcher.tile_x.wrapping_add(1);
                    self.fetcher.push_x += 8;
                    self.fetcher.phase = Phase::GetTile;
                }
            }
        }
    }

    fn fetch_tile_index(&mut self) {
        let (map_base, col, row) = if self.fetcher.window {
            let base = if self.lcdc & 0x40 != 0 {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            (
                base,
                self.fetcher.tile_x as usize & 0x1F,
                self.win_line_counter as usize / 8,
            )
        } else {
            let base = if self.lcdc & 0x08 != 0 {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            let col = (self.scx as usize / 8 + self.fetcher.tile_x as usize) & 0x1F;
            let row = self.ly.wrapping_add(self.scy) as usize / 8;
            (base, col, row)
        };
        let addr = map_base + row * 32 + col;
        self.fetcher.tile_index = self.vram[0][addr];
        self.fetcher.attr = if self.cgb { self.vram[1][addr] } else { 0 };
    }

    fn tile_bank(&self) -> usize {
        ((self.fetcher.attr >> 3) & 0x01) as usize
    }

    /// Address of the low byte of the current tile row, with Y flip.
    fn tile_row_addr(&self) -> usize {
        let mut fine_y = if self.fetcher.window {
            self.win_line_counter & 0x07
        } else {
            self.ly.wrapping_add(self.scy) & 0x07
        } as usize;
        if self.fetcher.attr & 0x40 != 0 {
            fine_y = 7 - fine_y;
        }
        let tile = self.fetcher.tile_index;
        let base = if self.lcdc & 0x10 != 0 {
            tile as usize * 16
        } else {
            TILE_DATA_SIGNED_BASE + (tile ^ 0x80) as usize * 16
        };
        base + fine_y * 2
    }

    /// Pick up to three latched sprites overlapping the tile being fetched,
    /// keeping the scan's priority order.
    fn select_sprites(&mut self) {
        self.fetcher.sprite_count = 0;
        if self.lcdc & 0x02 == 0 {
            return;
        }
        let start = self.fetcher.push_x;
        for s in &self.line_sprites[..self.sprite_count] {
            if self.fetcher.sprite_count == SPRITES_PER_PUSH {
                break;
            }
            if s.x < start + 8 && s.x + 8 > start {
                self.fetcher.sprites[self.fetcher.sprite_count] = SpriteRow {
                    sprite: *s,
                    lo: 0,
                    hi: 0,
                };
                self.fetcher.sprite_count += 1;
            }
        }
    }

    fn sprite_row_addr(&self, s: &Sprite) -> (usize, usize) {
        let height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let mut tile = s.tile;
        if height == 16 {
            tile &= 0xFE;
        }
        let mut line = self.ly as i16 - s.y;
        if s.flags & 0x40 != 0 {
            line = height - 1 - line;
        }
        let bank = if self.cgb {
            ((s.flags >> 3) & 0x01) as usize
        } else {
            0
        };
        let addr = tile as usize * 16 + line as usize * 2;
        (bank, addr)
    }

    fn push_pixels(&mut self) {
        let attr = self.fetcher.attr;
        let bg_on = self.cgb || self.lcdc & 0x01 != 0;
        // CGB: LCDC.0 clear puts every sprite above the background.
        let master_priority = !self.cgb || self.lcdc & 0x01 != 0;

        for i in 0..8u8 {
            let bit = if attr & 0x20 != 0 { i } else { 7 - i };
            let mut bg_id =
                (((self.fetcher.hi >> bit) & 1) << 1) | ((self.fetcher.lo >> bit) & 1);
            if !bg_on {
                bg_id = 0;
            }
            let bg_color = if self.cgb {
                self.bg_palette_color((attr & 0x07) as usize, bg_id as usize)
            } else {
                DMG_PALETTE[Self::dmg_shade(self.bgp, bg_id) as usize]
            };

            let x = self.fetcher.push_x + i as i16;
            let color = self
                .sprite_pixel(x)
                .filter(|&(_, flags)| {
                    !master_priority
                        || bg_id == 0
                        || (flags & 0x80 == 0 && (!self.cgb || attr & 0x80 == 0))
                })
                .map(|(color, _)| color)
                .unwrap_or(bg_color);
            self.fifo.push(color);
        }
    }

    /// First opaque sprite pixel at screen column `x`, with its OAM flags.
    fn sprite_pixel(&self, x: i16) -> Option<(u32, u8)> {
        self.fetcher.sprites[..self.fetcher.sprite_count]
            .iter()
            .find_map(|row| {
                let s = &row.sprite;
                let col = x - s.x;
                if !(0..8).contains(&col) {
                    return None;
                }
                let bit = if s.flags & 0x20 != 0 { col } else { 7 - col } as u8;
                let id = (((row.hi >> bit) & 1) << 1) | ((row.lo >> bit) & 1);
                if id == 0 {
                    return None;
                }
                let color = if self.cgb {
                    self.ob_palette_color((s.flags & 0x07) as usize, id as usize)
                } else {
                    let pal = if s.flags & 0x10 != 0 {
                        self.obp1
                    } else {
                        self.obp0
                    };
                    DMG_PALETTE[Self::dmg_shade(pal, id) as usize]
                };
                Some((color, s.flags))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_wraps() {
        let mut fifo = PixelFifo::default();
        for round in 0..3u32 {
            for i in 0..12 {
                fifo.push(round * 100 + i);
            }
            for i in 0..12 {
                assert_eq!(fifo.pop(), Some(round * 100 + i));
            }
        }
        assert_eq!(fifo.pop(), None);
    }
}
