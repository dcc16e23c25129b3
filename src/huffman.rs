use crate::bits::{BitReader, BitWriter};
use crate::error::{BrotliError, ErrorKind, Res};

/// Longest code word the format permits for symbol codes.
pub const MAX_LENGTH: u8 = 15;
/// Longest code word for the code-length code itself.
pub const MAX_CODE_LENGTH_LENGTH: u8 = 5;

/// Order in which the 18 code-length-code lengths appear in a complex
/// prefix code description.
const CODE_LENGTH_ORDER: [usize; 18] = [1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15];

const REPEAT_PREVIOUS: u16 = 16;
const REPEAT_ZERO: u16 = 17;

/// The fixed variable-length code for code-length-code lengths, as
/// (bits, bit count) pairs indexed by length, matching the read side in
/// `read_length_vlc`.
const LENGTH_VLC: [(u32, u32); 6] = [(0b00, 2), (0b0111, 4), (0b011, 3), (0b10, 2), (0b01, 2), (0b1111, 4)];

/// Flat reverse-lookup tables mapping a bit pattern to a code length
/// and a symbol. A pattern of |max_len| lookahead bits resolves in one
/// probe; the entry tells how many of those bits the code word used.
#[derive(Debug)]
pub struct PrefixCode {
    bits2len: Vec<u8>,
    bits2sym: Vec<u16>,
    max_len: u32,
}

impl PrefixCode {
    /// Degenerate single-symbol code: reads zero bits per symbol.
    fn single(symbol: u16) -> Self {
        PrefixCode {
            bits2len: vec![0],
            bits2sym: vec![symbol],
            max_len: 0,
        }
    }

    /// Build the lookup tables from per-symbol code lengths. Lengths
    /// must satisfy the Kraft equality unless exactly one is nonzero.
    pub fn from_lengths(lengths: &[u8]) -> Res<Self> {
        let mut nonzero = 0usize;
        let mut space = 0u32;
        let mut max_len = 0u8;
        let mut single = 0u16;
        for (sym, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            if len > MAX_LENGTH {
                return Err(BrotliError::new(
                    ErrorKind::InvalidPrefixCode,
                    format!("code length {} exceeds {}", len, MAX_LENGTH),
                ));
            }
            nonzero += 1;
            single = sym as u16;
            space += 1 << (MAX_LENGTH - len);
            max_len = max_len.max(len);
        }
        match nonzero {
            0 => {
                return Err(BrotliError::new(
                    ErrorKind::InvalidPrefixCode,
                    "no symbols in prefix code".into(),
                ))
            }
            1 => return Ok(PrefixCode::single(single)),
            _ => {}
        }
        if space != 1 << MAX_LENGTH {
            return Err(BrotliError::new(
                ErrorKind::InvalidPrefixCode,
                format!(
                    "Kraft sum {} of prefix code is not {}",
                    space,
                    1u32 << MAX_LENGTH
                ),
            ));
        }

        let codes = canonical_codes(lengths);
        let size = 1usize << max_len;
        let mut bits2len = vec![0u8; size];
        let mut bits2sym = vec![0u16; size];
        for (sym, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            // The reader consumes code words LSB first, so the table is
            // indexed by the bit-reversed canonical code.
            let rev = reverse_bits(codes[sym], len) as usize;
            let step = 1usize << len;
            let mut slot = rev;
            while slot < size {
                bits2len[slot] = len;
                bits2sym[slot] = sym as u16;
                slot += step;
            }
        }
        Ok(PrefixCode {
            bits2len,
            bits2sym,
            max_len: max_len as u32,
        })
    }

    /// Decode one symbol.
    pub fn read_symbol(&self, r: &mut BitReader) -> Res<u16> {
        let k = r.peek(self.max_len) as usize;
        r.consume(self.bits2len[k] as u32)?;
        Ok(self.bits2sym[k])
    }
}

/// Canonical code assignment shared by the reader and the writer: sort
/// by (length, symbol), hand out consecutive MSB-first code words.
fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut order: Vec<u16> = (0..lengths.len() as u16)
        .filter(|&s| lengths[s as usize] != 0)
        .collect();
    order.sort_by_key(|&s| (lengths[s as usize], s));

    let mut codes = vec![0u32; lengths.len()];
    let mut next = 0u32;
    let mut last_len = 0u8;
    for sym in order {
        let len = lengths[sym as usize];
        next <<= len - last_len;
        codes[sym as usize] = next;
        next += 1;
        last_len = len;
    }
    codes
}

fn reverse_bits(code: u32, len: u8) -> u32 {
    code.reverse_bits() >> (32 - len as u32)
}

/// Bits per symbol in the simple prefix code description.
fn symbol_width(alphabet_size: usize) -> u32 {
    debug_assert!(alphabet_size >= 1);
    let width = 16 - ((alphabet_size - 1) as u16).leading_zeros();
    width.max(1)
}

/// Read a prefix code description in either RFC form.
pub fn read_prefix_code(r: &mut BitReader, alphabet_size: usize) -> Res<PrefixCode> {
    let hskip = r.read(2)?;
    if hskip == 1 {
        read_simple(r, alphabet_size)
    } else {
        read_complex(r, alphabet_size, hskip as usize)
    }
}

fn read_simple(r: &mut BitReader, alphabet_size: usize) -> Res<PrefixCode> {
    let width = symbol_width(alphabet_size);
    let nsym = r.read(2)? as usize + 1;
    let mut syms = [0u16; 4];
    for i in 0..nsym {
        let sym = r.read(width)?;
        if sym as usize >= alphabet_size {
            return Err(BrotliError::new(
                ErrorKind::InvalidPrefixCode,
                format!("symbol {} outside alphabet of {}", sym, alphabet_size),
            ));
        }
        if syms[..i].contains(&(sym as u16)) {
            return Err(BrotliError::new(
                ErrorKind::InvalidPrefixCode,
                format!("symbol {} listed twice", sym),
            ));
        }
        syms[i] = sym as u16;
    }

    let mut lengths = vec![0u8; alphabet_size];
    match nsym {
        1 => return Ok(PrefixCode::single(syms[0])),
        2 => {
            lengths[syms[0] as usize] = 1;
            lengths[syms[1] as usize] = 1;
        }
        3 => {
            lengths[syms[0] as usize] = 1;
            lengths[syms[1] as usize] = 2;
            lengths[syms[2] as usize] = 2;
        }
        _ => {
            if r.read_bit()? {
                lengths[syms[0] as usize] = 1;
                lengths[syms[1] as usize] = 2;
                lengths[syms[2] as usize] = 3;
                lengths[syms[3] as usize] = 3;
            } else {
                for &s in &syms {
                    lengths[s as usize] = 2;
                }
            }
        }
    }
    PrefixCode::from_lengths(&lengths)
}

/// The fixed code for code-length-code lengths (RFC 7932 section 3.5,
/// bit patterns parsed LSB first).
fn read_length_vlc(r: &mut BitReader) -> Res<u8> {
    Ok(match r.read(2)? {
        0 => 0,
        1 => 4,
        2 => 3,
        _ => {
            if !r.read_bit()? {
                2
            } else if !r.read_bit()? {
                1
            } else {
                5
            }
        }
    })
}

fn read_complex(r: &mut BitReader, alphabet_size: usize, hskip: usize) -> Res<PrefixCode> {
    // Lengths of the code-length code, in the fixed scan order. Reading
    // stops as soon as the code is complete.
    let mut cl_lengths = [0u8; 18];
    let mut space = 0u32;
    let mut nonzero = 0usize;
    let mut single = 0u16;
    for &idx in CODE_LENGTH_ORDER.iter().skip(hskip) {
        let len = read_length_vlc(r)?;
        cl_lengths[idx] = len;
        if len != 0 {
            nonzero += 1;
            single = idx as u16;
            space += 32 >> len;
            if space >= 32 {
                break;
            }
        }
    }
    if nonzero == 0 || (nonzero >= 2 && space != 32) {
        return Err(BrotliError::new(
            ErrorKind::InvalidPrefixCode,
            format!("bad code-length code, Kraft sum {}/32", space),
        ));
    }
    let cl_code = if nonzero == 1 {
        PrefixCode::single(single)
    } else {
        PrefixCode::from_lengths(&cl_lengths)?
    };

    // Symbol lengths, with the two repeat escapes. Consecutive repeat
    // codes extend the previous repeat count instead of starting over.
    let mut lengths = vec![0u8; alphabet_size];
    let mut space = 0u32;
    let mut i = 0usize;
    let mut prev_nonzero = 8u8;
    let mut last_repeat: Option<(u16, u32)> = None;
    while i < alphabet_size && space < 32768 {
        let code = cl_code.read_symbol(r)?;
        match code {
            0..=15 => {
                lengths[i] = code as u8;
                i += 1;
                if code != 0 {
                    prev_nonzero = code as u8;
                    space += 32768 >> code;
                }
                last_repeat = None;
            }
            REPEAT_PREVIOUS => {
                let extra = r.read(2)?;
                let (total, fresh) = match last_repeat {
                    Some((REPEAT_PREVIOUS, prev)) => {
                        let t = 4 * (prev - 2) + 3 + extra;
                        (t, t - prev)
                    }
                    _ => (3 + extra, 3 + extra),
                };
                if i + fresh as usize > alphabet_size {
                    return Err(BrotliError::new(
                        ErrorKind::InvalidPrefixCode,
                        format!("length repeat of {} overflows alphabet", fresh),
                    ));
                }
                for _ in 0..fresh {
                    lengths[i] = prev_nonzero;
                    i += 1;
                }
                space += fresh * (32768 >> prev_nonzero);
                last_repeat = Some((REPEAT_PREVIOUS, total));
            }
            REPEAT_ZERO => {
                let extra = r.read(3)?;
                let (total, fresh) = match last_repeat {
                    Some((REPEAT_ZERO, prev)) => {
                        let t = 8 * (prev - 2) + 3 + extra;
                        (t, t - prev)
                    }
                    _ => (3 + extra, 3 + extra),
                };
                if i + fresh as usize > alphabet_size {
                    return Err(BrotliError::new(
                        ErrorKind::InvalidPrefixCode,
                        format!("zero repeat of {} overflows alphabet", fresh),
                    ));
                }
                i += fresh as usize;
                last_repeat = Some((REPEAT_ZERO, total));
            }
            _ => {
                return Err(BrotliError::new(
                    ErrorKind::InvalidPrefixCode,
                    format!("code length symbol {}", code),
                ))
            }
        }
    }

    let nonzero = lengths.iter().filter(|&&l| l != 0).count();
    match nonzero {
        0 => Err(BrotliError::new(
            ErrorKind::InvalidPrefixCode,
            "prefix code with no symbols".into(),
        )),
        1 => {
            let sym = lengths.iter().position(|&l| l != 0).unwrap_or(0);
            Ok(PrefixCode::single(sym as u16))
        }
        _ => {
            if space != 32768 {
                return Err(BrotliError::new(
                    ErrorKind::InvalidPrefixCode,
                    format!("symbol lengths, Kraft sum {}/32768", space),
                ));
            }
            PrefixCode::from_lengths(&lengths)
        }
    }
}

/// Encode-side prefix code: transmitted code lengths plus the
/// bit-reversed canonical code words used when emitting symbols.
pub struct EncoderCode {
    lengths: Vec<u8>,
    codes: Vec<u32>,
    used: Vec<u16>,
}

impl EncoderCode {
    /// Assign transmitted code lengths for the given frequencies. Up to
    /// four used symbols take the prescribed simple-form shapes; larger
    /// alphabets get length-limited Huffman lengths.
    pub fn from_frequencies(freqs: &[u32], max_len: u8) -> Self {
        let used: Vec<u16> = (0..freqs.len() as u16)
            .filter(|&s| freqs[s as usize] != 0)
            .collect();
        let mut lengths = vec![0u8; freqs.len()];
        match used.len() {
            // A code is transmitted even when no symbol is ever emitted.
            0 => {
                return EncoderCode {
                    lengths,
                    codes: vec![0; freqs.len()],
                    used: vec![0],
                }
            }
            // Zero-bit code word.
            1 => {}
            2 => {
                lengths[used[0] as usize] = 1;
                lengths[used[1] as usize] = 1;
            }
            3 => {
                let mut by_freq = used.clone();
                by_freq.sort_by_key(|&s| std::cmp::Reverse(freqs[s as usize]));
                lengths[by_freq[0] as usize] = 1;
                lengths[by_freq[1] as usize] = 2;
                lengths[by_freq[2] as usize] = 2;
            }
            4 => {
                let mut by_freq = used.clone();
                by_freq.sort_by_key(|&s| std::cmp::Reverse(freqs[s as usize]));
                let f: Vec<u64> = by_freq.iter().map(|&s| freqs[s as usize] as u64).collect();
                let flat = 2 * (f[0] + f[1] + f[2] + f[3]);
                let skew = f[0] + 2 * f[1] + 3 * (f[2] + f[3]);
                if skew < flat {
                    lengths[by_freq[0] as usize] = 1;
                    lengths[by_freq[1] as usize] = 2;
                    lengths[by_freq[2] as usize] = 3;
                    lengths[by_freq[3] as usize] = 3;
                } else {
                    for &s in &used {
                        lengths[s as usize] = 2;
                    }
                }
            }
            _ => limited_code_lengths(freqs, &used, max_len, &mut lengths),
        }

        let canonical = canonical_codes(&lengths);
        let mut codes = vec![0u32; freqs.len()];
        for &s in &used {
            let len = lengths[s as usize];
            if len > 0 {
                codes[s as usize] = reverse_bits(canonical[s as usize], len);
            }
        }
        EncoderCode { lengths, codes, used }
    }

    /// Emit one symbol. Zero bits for a degenerate code.
    pub fn write_symbol(&self, w: &mut BitWriter, sym: usize) {
        w.write(self.codes[sym], self.lengths[sym] as u32);
    }

    /// Write the code description in the cheaper RFC form.
    pub fn write_description(&self, w: &mut BitWriter, alphabet_size: usize) {
        debug_assert_eq!(self.lengths.len(), alphabet_size);
        if self.used.len() <= 4 {
            self.write_simple(w, alphabet_size);
        } else {
            self.write_complex(w);
        }
    }

    fn write_simple(&self, w: &mut BitWriter, alphabet_size: usize) {
        let width = symbol_width(alphabet_size);
        let nsym = self.used.len();
        w.write(1, 2); // HSKIP = 1
        w.write(nsym as u32 - 1, 2);

        // Symbols are listed shortest code first; groups of equal
        // length in increasing symbol order.
        let mut order = self.used.clone();
        order.sort_by_key(|&s| (self.lengths[s as usize], s));
        for &s in &order {
            w.write(s as u32, width);
        }
        if nsym == 4 {
            // Tree-select bit: depth-3 shape or the flat shape.
            w.write(u32::from(self.lengths[order[0] as usize] == 1), 1);
        }
    }

    fn write_complex(&self, w: &mut BitWriter) {
        let stream = run_length_encode(&self.lengths);

        let mut cl_freqs = [0u32; 18];
        for &(code, _, _) in &stream {
            cl_freqs[code as usize] += 1;
        }
        let cl_lengths = code_length_code_lengths(&cl_freqs);
        let cl_canonical = canonical_codes(&cl_lengths);

        // HSKIP covers leading zero entries of the scan order.
        let hskip = if cl_lengths[CODE_LENGTH_ORDER[0]] == 0 && cl_lengths[CODE_LENGTH_ORDER[1]] == 0 {
            if cl_lengths[CODE_LENGTH_ORDER[2]] == 0 {
                3
            } else {
                2
            }
        } else {
            0
        };
        w.write(hskip, 2);

        // The reader stops at a complete code-length code, so stop
        // writing at the same point.
        let mut space = 0u32;
        for &idx in CODE_LENGTH_ORDER.iter().skip(hskip as usize) {
            let len = cl_lengths[idx];
            let (bits, count) = LENGTH_VLC[len as usize];
            w.write(bits, count);
            if len != 0 {
                space += 32 >> len;
                if space >= 32 {
                    break;
                }
            }
        }

        let cl_nonzero = cl_lengths.iter().filter(|&&l| l != 0).count();
        for &(code, extra, extra_bits) in &stream {
            if cl_nonzero > 1 {
                let len = cl_lengths[code as usize];
                w.write(reverse_bits(cl_canonical[code as usize], len), len as u32);
            }
            w.write(extra, extra_bits);
        }
    }
}

/// Turn a length array into code-length symbols. Repeat codes are
/// capped and separated by a literal so that the reader's chained
/// repeat rule never kicks in; trailing zeros are dropped entirely
/// because the reader stops once the code is complete.
fn run_length_encode(lengths: &[u8]) -> Vec<(u16, u32, u32)> {
    let mut stream = Vec::new();
    let last = match lengths.iter().rposition(|&l| l != 0) {
        Some(p) => p,
        None => return stream,
    };
    let mut prev_nonzero = 8u8;
    let mut i = 0usize;
    while i <= last {
        let len = lengths[i];
        let mut run = 1usize;
        while i + run <= last && lengths[i + run] == len {
            run += 1;
        }
        i += run;
        if len == 0 {
            loop {
                if run < 3 {
                    for _ in 0..run {
                        stream.push((0, 0, 0));
                    }
                    break;
                }
                let take = run.min(10);
                stream.push((REPEAT_ZERO, take as u32 - 3, 3));
                run -= take;
                if run > 0 {
                    stream.push((0, 0, 0));
                    run -= 1;
                }
            }
        } else {
            if prev_nonzero != len {
                stream.push((len as u16, 0, 0));
                run -= 1;
                prev_nonzero = len;
            }
            loop {
                if run < 3 {
                    for _ in 0..run {
                        stream.push((len as u16, 0, 0));
                    }
                    break;
                }
                let take = run.min(6);
                stream.push((REPEAT_PREVIOUS, take as u32 - 3, 2));
                run -= take;
                if run > 0 {
                    stream.push((len as u16, 0, 0));
                    run -= 1;
                }
            }
        }
    }
    stream
}

/// Code lengths for the 18-symbol code-length alphabet (limit 5).
fn code_length_code_lengths(freqs: &[u32; 18]) -> [u8; 18] {
    let used: Vec<u16> = (0..18u16).filter(|&s| freqs[s as usize] != 0).collect();
    let mut lengths = [0u8; 18];
    match used.len() {
        0 => {}
        1 => lengths[used[0] as usize] = 1,
        2 => {
            lengths[used[0] as usize] = 1;
            lengths[used[1] as usize] = 1;
        }
        _ => {
            let mut out = vec![0u8; 18];
            limited_code_lengths(freqs, &used, MAX_CODE_LENGTH_LENGTH, &mut out);
            lengths.copy_from_slice(&out);
        }
    }
    lengths
}

/// Length-limited Huffman code lengths: plain Huffman depths, then the
/// clamp-and-rebalance loop until the Kraft equality holds again.
fn limited_code_lengths(freqs: &[u32], used: &[u16], limit: u8, lengths: &mut [u8]) {
    debug_assert!(used.len() >= 2);
    debug_assert!(used.len() <= 1 << limit);

    let mut leaves: Vec<(u64, u16)> = used.iter().map(|&s| (freqs[s as usize] as u64, s)).collect();
    leaves.sort();

    // Two-queue Huffman tree; internal nodes are created in
    // nondecreasing weight order, so a plain FIFO suffices.
    let n = leaves.len();
    let mut weight: Vec<u64> = leaves.iter().map(|&(f, _)| f).collect();
    let mut parent = vec![usize::MAX; 2 * n - 1];
    let mut next_leaf = 0usize;
    let mut internal = std::collections::VecDeque::new();
    for _ in 0..n - 1 {
        let take = |weight: &[u64], internal: &mut std::collections::VecDeque<usize>, next_leaf: &mut usize| {
            let leaf_ok = *next_leaf < n;
            let node_ok = !internal.is_empty();
            if leaf_ok && (!node_ok || weight[*next_leaf] <= weight[internal[0]]) {
                let i = *next_leaf;
                *next_leaf += 1;
                i
            } else {
                internal.pop_front().unwrap_or_default()
            }
        };
        let a = take(&weight, &mut internal, &mut next_leaf);
        let b = take(&weight, &mut internal, &mut next_leaf);
        let node = weight.len();
        weight.push(weight[a] + weight[b]);
        parent[a] = node;
        parent[b] = node;
        internal.push_back(node);
    }

    // Parents always come after their children, so one backward pass
    // yields every depth.
    let mut depth = vec![0u32; 2 * n - 1];
    for i in (0..2 * n - 2).rev() {
        depth[i] = depth[parent[i]] + 1;
    }

    for (leaf, &(_, sym)) in leaves.iter().enumerate() {
        lengths[sym as usize] = (depth[leaf].min(limit as u32)) as u8;
    }

    let full = 1u64 << limit;
    let kraft = |lengths: &[u8]| -> u64 {
        used.iter()
            .map(|&s| 1u64 << (limit - lengths[s as usize]))
            .sum()
    };

    // Clamping can oversubscribe the code; demote the longest code
    // word still below the limit until it fits.
    let mut sum = kraft(lengths);
    while sum > full {
        let victim = used
            .iter()
            .filter(|&&s| lengths[s as usize] < limit)
            .max_by_key(|&&s| lengths[s as usize])
            .copied()
            .unwrap_or(used[0]);
        lengths[victim as usize] += 1;
        sum -= 1 << (limit - lengths[victim as usize]);
    }
    // And promote longest code words while there is slack. The deficit
    // is always a multiple of the smallest step, so this lands exactly
    // on the equality.
    while sum < full {
        let victim = used
            .iter()
            .max_by_key(|&&s| lengths[s as usize])
            .copied()
            .unwrap_or(used[0]);
        sum += 1 << (limit - lengths[victim as usize]);
        lengths[victim as usize] -= 1;
    }
}
