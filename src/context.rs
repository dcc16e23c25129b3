use crate::bits::BitReader;
use crate::error::{BrotliError, ErrorKind, Res};
use crate::huffman::{read_prefix_code, PrefixCode};

/// How the 6-bit literal context is derived from the previous two
/// output bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Lsb6,
    Msb6,
    Utf8,
    Signed,
}

impl ContextMode {
    pub fn from_bits(v: u32) -> Self {
        match v & 3 {
            0 => ContextMode::Lsb6,
            1 => ContextMode::Msb6,
            2 => ContextMode::Utf8,
            _ => ContextMode::Signed,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            ContextMode::Lsb6 => 0,
            ContextMode::Msb6 => 1,
            ContextMode::Utf8 => 2,
            ContextMode::Signed => 3,
        }
    }
}

/// Context id for the next literal, |p1| being the most recent byte.
pub fn literal_context(mode: ContextMode, p1: u8, p2: u8) -> u8 {
    match mode {
        ContextMode::Lsb6 => p1 & 0x3F,
        ContextMode::Msb6 => p1 >> 2,
        ContextMode::Utf8 => UTF8_LUT0[p1 as usize] | UTF8_LUT1[p2 as usize],
        ContextMode::Signed => (SIGNED_LUT[p1 as usize] << 3) | SIGNED_LUT[p2 as usize],
    }
}

// Context tables from RFC 7932 section 7.1.
#[rustfmt::skip]
const UTF8_LUT0: [u8; 256] = [
     0,  0,  0,  0,  0,  0,  0,  0,  0,  4,  4,  0,  0,  4,  0,  0,
     0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
     8, 12, 16, 12, 12, 20, 12, 16, 24, 28, 12, 12, 32, 12, 36, 12,
    44, 44, 44, 44, 44, 44, 44, 44, 44, 44, 32, 32, 24, 40, 28, 12,
    12, 48, 52, 52, 52, 48, 52, 52, 52, 48, 52, 52, 52, 52, 52, 48,
    52, 52, 52, 52, 52, 48, 52, 52, 52, 52, 52, 24, 12, 28, 12, 12,
    12, 56, 60, 60, 60, 56, 60, 60, 60, 56, 60, 60, 60, 60, 60, 56,
    60, 60, 60, 60, 60, 56, 60, 60, 60, 60, 60, 24, 12, 28, 12,  0,
     0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,
     0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,
     0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,
     0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,  0,  1,
     2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,
     2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,
     2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,
     2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,  2,  3,
];

#[rustfmt::skip]
const UTF8_LUT1: [u8; 256] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1,
    1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1,
    1, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 1, 1, 1, 1, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
];

#[rustfmt::skip]
const SIGNED_LUT: [u8; 256] = [
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 7,
];

/// The shared small-count code used for block-type and tree counts:
/// one absent bit means 1, otherwise a 3-bit width and that many extra
/// bits on top of a power-of-two base.
pub fn read_count(r: &mut BitReader) -> Res<u32> {
    if !r.read_bit()? {
        return Ok(1);
    }
    let k = r.read(3)?;
    Ok((1 << k) + 1 + r.read(k)?)
}

/// A decoded context map: per (block type, context) tree index.
#[derive(Debug)]
pub struct ContextMap {
    map: Vec<u8>,
    stride: usize,
}

impl ContextMap {
    /// All-zero map, used whenever only one tree is in play.
    pub fn trivial(num_types: usize, stride: usize) -> Self {
        ContextMap {
            map: vec![0; num_types * stride],
            stride,
        }
    }

    pub fn parse(
        r: &mut BitReader,
        num_types: usize,
        stride: usize,
        num_trees: u32,
    ) -> Res<Self> {
        let map_size = num_types * stride;
        let rle_max = if r.read_bit()? { r.read(4)? + 1 } else { 0 };
        let code = read_prefix_code(r, (num_trees + rle_max) as usize)?;

        let mut map = Vec::with_capacity(map_size);
        while map.len() < map_size {
            let sym = code.read_symbol(r)? as u32;
            if sym == 0 {
                map.push(0);
            } else if sym <= rle_max {
                let zeros = (1usize << sym) + r.read(sym)? as usize;
                if map.len() + zeros > map_size {
                    return Err(BrotliError::new(
                        ErrorKind::InvalidContextMap,
                        format!(
                            "zero run of {} overflows map of {} at {}",
                            zeros,
                            map_size,
                            map.len()
                        ),
                    ));
                }
                map.resize(map.len() + zeros, 0);
            } else {
                map.push((sym - rle_max) as u8);
            }
        }
        if r.read_bit()? {
            inverse_move_to_front(&mut map);
        }
        Ok(ContextMap { map, stride })
    }

    pub fn lookup(&self, block_type: usize, context: usize) -> usize {
        debug_assert!(context < self.stride);
        self.map[block_type * self.stride + context] as usize
    }
}

fn inverse_move_to_front(data: &mut [u8]) {
    let mut mtf: [u8; 256] = std::array::from_fn(|i| i as u8);
    for entry in data.iter_mut() {
        let index = *entry as usize;
        let value = mtf[index];
        *entry = value;
        mtf.copy_within(0..index, 1);
        mtf[0] = value;
    }
}

/// Block-count codes: (base, extra bits) per RFC 7932 section 6.
#[rustfmt::skip]
const BLOCK_COUNT_CODES: [(u32, u32); 26] = [
    (1, 2), (5, 2), (9, 2), (13, 2), (17, 3), (25, 3), (33, 3), (41, 3),
    (49, 4), (65, 4), (81, 4), (97, 4), (113, 5), (145, 5), (177, 5), (209, 5),
    (241, 6), (305, 6), (369, 7), (497, 8), (753, 9), (1265, 10), (2289, 11),
    (4337, 12), (8433, 13), (16625, 24),
];

/// Block-switch state for one of the three symbol categories.
pub struct BlockState {
    num_types: usize,
    current: usize,
    previous: usize,
    remaining: usize,
    type_code: Option<PrefixCode>,
    count_code: Option<PrefixCode>,
}

impl BlockState {
    /// Read the per-category header: type count, and for more than one
    /// type the two prefix codes plus the first block length.
    pub fn parse(r: &mut BitReader) -> Res<Self> {
        let num_types = read_count(r)? as usize;
        if num_types == 1 {
            return Ok(BlockState {
                num_types,
                current: 0,
                previous: 1,
                remaining: 0,
                type_code: None,
                count_code: None,
            });
        }
        let type_code = read_prefix_code(r, num_types + 2)?;
        let count_code = read_prefix_code(r, 26)?;
        let remaining = read_block_count(r, &count_code)?;
        Ok(BlockState {
            num_types,
            current: 0,
            previous: 1,
            remaining,
            type_code: Some(type_code),
            count_code: Some(count_code),
        })
    }

    pub fn num_types(&self) -> usize {
        self.num_types
    }

    /// Block type for the next symbol of this category, consuming a
    /// block-switch command first if the current block is used up.
    pub fn next(&mut self, r: &mut BitReader) -> Res<usize> {
        if self.num_types == 1 {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.switch(r)?;
        }
        self.remaining -= 1;
        Ok(self.current)
    }

    fn switch(&mut self, r: &mut BitReader) -> Res<()> {
        let (Some(type_code), Some(count_code)) = (&self.type_code, &self.count_code) else {
            return Ok(());
        };
        let sym = type_code.read_symbol(r)? as usize;
        let next_type = match sym {
            0 => self.previous,
            1 => (self.current + 1) % self.num_types,
            s => s - 2,
        };
        self.previous = self.current;
        self.current = next_type;
        self.remaining = read_block_count(r, count_code)?;
        Ok(())
    }
}

fn read_block_count(r: &mut BitReader, code: &PrefixCode) -> Res<usize> {
    let sym = code.read_symbol(r)? as usize;
    let (base, extra) = BLOCK_COUNT_CODES[sym];
    Ok(base as usize + r.read(extra)? as usize)
}
