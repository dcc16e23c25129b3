use crate::bits::BitWriter;
use crate::command;
use crate::context::ContextMode;
use crate::distance::{self, DistanceRing, DistanceSymbol};
use crate::huffman::EncoderCode;
use crate::lz77::{Command, MatchFinder};

/// Encoder knobs. The window only bounds how far back references may
/// reach; any conformant decoder accepts the whole 10..=24 range.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub window_bits: u8,
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressOptions { window_bits: 22 }
    }
}

const MAX_META_BLOCK: usize = 1 << 24;
const MAX_UNCOMPRESSED_BLOCK: usize = 1 << 16;

/// Compress with the default 4 MiB window.
pub fn compress(input: &[u8]) -> Vec<u8> {
    compress_with(input, &CompressOptions::default())
}

pub fn compress_with(input: &[u8], options: &CompressOptions) -> Vec<u8> {
    let wbits = u32::from(options.window_bits.clamp(10, 24));
    let mut w = BitWriter::new();
    write_window_bits(&mut w, wbits);

    if input.is_empty() {
        w.write(1, 1); // ISLAST
        w.write(1, 1); // ISEMPTY
        return w.finish();
    }

    let max_distance = (1usize << wbits) - 16;
    let mut finder = MatchFinder::new();
    let mut chunks = Vec::new();
    let mut any_match = false;
    let mut start = 0;
    while start < input.len() {
        let end = (start + MAX_META_BLOCK).min(input.len());
        let commands = finder.commands(input, start, end, max_distance);
        any_match |= commands.iter().any(|c| c.copy_len > 0);
        chunks.push((start, end, commands));
        start = end;
    }

    if !any_match {
        log::debug!("no back references found, taking the uncompressed fallback");
        return write_fallback(w, input);
    }

    let mut ring = DistanceRing::new();
    let count = chunks.len();
    for (i, (start, end, commands)) in chunks.into_iter().enumerate() {
        let meta = MetaBlock::plan(input, &commands, &mut ring);
        meta.write(&mut w, input, end - start, i + 1 == count);
        log::debug!(
            "compressed meta-block {}..{} with {} commands",
            start,
            end,
            commands.len()
        );
    }
    w.finish()
}

fn write_window_bits(w: &mut BitWriter, wbits: u32) {
    match wbits {
        16 => w.write(0, 1),
        17 => {
            w.write(1, 1);
            w.write(0, 3);
            w.write(0, 3);
        }
        18..=24 => {
            w.write(1, 1);
            w.write(wbits - 17, 3);
        }
        _ => {
            // 10..=15 take the deep form.
            w.write(1, 1);
            w.write(0, 3);
            w.write(wbits - 8, 3);
        }
    }
}

/// The correctness floor: raw copies of the input in 64 KiB meta-blocks
/// plus an empty last block, matching the reference encoder's
/// lowest-quality output byte for byte.
fn write_fallback(mut w: BitWriter, input: &[u8]) -> Vec<u8> {
    for chunk in input.chunks(MAX_UNCOMPRESSED_BLOCK) {
        w.write(0, 1); // ISLAST = 0
        w.write(0, 2); // MNIBBLES -> 4 nibbles
        w.write(chunk.len() as u32 - 1, 16);
        w.write(1, 1); // ISUNCOMPRESSED
        w.align();
        w.write_bytes(chunk);
    }
    w.write(1, 1); // ISLAST
    w.write(1, 1); // ISEMPTY
    w.finish()
}

/// One command resolved into stream symbols.
struct PlannedCommand {
    symbol: u16,
    insert_extra: (u32, u32),
    copy_extra: (u32, u32),
    literals: std::ops::Range<usize>,
    distance: Option<DistanceSymbol>,
}

/// A compressed meta-block, planned before any bit is written: the
/// distance ring has to be simulated in stream order to know each
/// command's distance symbol, and the three prefix codes need complete
/// symbol histograms.
struct MetaBlock {
    commands: Vec<PlannedCommand>,
    lit_code: EncoderCode,
    cmd_code: EncoderCode,
    dist_code: EncoderCode,
}

impl MetaBlock {
    fn plan(input: &[u8], commands: &[Command], ring: &mut DistanceRing) -> MetaBlock {
        let mut lit_freqs = vec![0u32; 256];
        let mut cmd_freqs = vec![0u32; command::ALPHABET_SIZE];
        let mut dist_freqs = vec![0u32; distance::alphabet_size(0, 0)];
        let mut planned = Vec::with_capacity(commands.len());

        for cmd in commands {
            let (icode, iextra, ibits) = command::insert_code_for(cmd.insert.len());
            let planned_cmd = if cmd.copy_len == 0 {
                // Trailing literal run: the insert phase reaches MLEN,
                // so the decoder never touches the copy half. Copy
                // code 0 carries no extra bits.
                PlannedCommand {
                    symbol: command::pack(icode, 0, false),
                    insert_extra: (iextra, ibits),
                    copy_extra: (0, 0),
                    literals: cmd.insert.clone(),
                    distance: None,
                }
            } else {
                let (ccode, cextra, cbits) = command::copy_code_for(cmd.copy_len);
                let dist = distance::encode_distance(cmd.distance as u32, ring, 0, 0);
                if dist.updates_ring {
                    ring.push(cmd.distance as u32);
                }
                let symbol = command::pack(icode, ccode, dist.code == 0);
                // pack() only grants the implicit form in the low
                // cells; otherwise distance code 0 goes on the wire.
                let distance = if symbol < 128 { None } else { Some(dist) };
                PlannedCommand {
                    symbol,
                    insert_extra: (iextra, ibits),
                    copy_extra: (cextra, cbits),
                    literals: cmd.insert.clone(),
                    distance,
                }
            };

            for &b in &input[planned_cmd.literals.clone()] {
                lit_freqs[b as usize] += 1;
            }
            cmd_freqs[planned_cmd.symbol as usize] += 1;
            if let Some(d) = &planned_cmd.distance {
                dist_freqs[d.code as usize] += 1;
            }
            planned.push(planned_cmd);
        }

        MetaBlock {
            commands: planned,
            lit_code: EncoderCode::from_frequencies(&lit_freqs, crate::huffman::MAX_LENGTH),
            cmd_code: EncoderCode::from_frequencies(&cmd_freqs, crate::huffman::MAX_LENGTH),
            dist_code: EncoderCode::from_frequencies(&dist_freqs, crate::huffman::MAX_LENGTH),
        }
    }

    fn write(&self, w: &mut BitWriter, input: &[u8], mlen: usize, is_last: bool) {
        w.write(u32::from(is_last), 1);
        if is_last {
            w.write(0, 1); // ISEMPTY = 0
        }
        let nibbles = match mlen - 1 {
            n if n < 1 << 16 => 4u32,
            n if n < 1 << 20 => 5,
            _ => 6,
        };
        w.write(nibbles - 4, 2);
        w.write((mlen - 1) as u32, nibbles * 4);
        if !is_last {
            w.write(0, 1); // ISUNCOMPRESSED = 0
        }

        // One block type per category, no context maps, plain distance
        // alphabet, LSB6 literal contexts.
        w.write(0, 1); // NBLTYPESL = 1
        w.write(0, 1); // NBLTYPESI = 1
        w.write(0, 1); // NBLTYPESD = 1
        w.write(0, 2); // NPOSTFIX = 0
        w.write(0, 4); // NDIRECT = 0
        w.write(ContextMode::Lsb6.bits(), 2);
        w.write(0, 1); // NTREESL = 1
        w.write(0, 1); // NTREESD = 1

        self.lit_code.write_description(w, 256);
        self.cmd_code.write_description(w, command::ALPHABET_SIZE);
        self.dist_code.write_description(w, distance::alphabet_size(0, 0));

        for cmd in &self.commands {
            self.cmd_code.write_symbol(w, cmd.symbol as usize);
            w.write(cmd.insert_extra.0, cmd.insert_extra.1);
            w.write(cmd.copy_extra.0, cmd.copy_extra.1);
            for &b in &input[cmd.literals.clone()] {
                self.lit_code.write_symbol(w, b as usize);
            }
            if let Some(d) = &cmd.distance {
                self.dist_code.write_symbol(w, d.code as usize);
                w.write(d.extra, d.extra_bits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn empty_input_is_the_one_byte_stream() {
        assert_eq!(compress(b""), [0x3B]);
    }

    #[test_log::test]
    fn one_byte_takes_the_fallback_layout() {
        assert_eq!(compress(b"a"), [0x0B, 0x00, 0x80, 0x61, 0x03]);
    }

    #[test_log::test]
    fn short_text_matches_the_reference_fallback() {
        let mut expected = vec![0x0B, 0x06, 0x80];
        expected.extend_from_slice(b"Hello, World!");
        expected.push(0x03);
        assert_eq!(compress(b"Hello, World!"), expected);
    }

    #[test_log::test]
    fn fallback_splits_past_64k() {
        let input = vec![0xA7; (1 << 16) + 3];
        // 0xA7A7... has matches, so force the fallback by checking the
        // raw-block writer directly.
        let mut w = BitWriter::new();
        write_window_bits(&mut w, 22);
        let out = write_fallback(w, &input);
        // Two raw blocks plus the empty last block and headers.
        assert!(out.len() > input.len());
        assert_eq!(crate::decoder::decompress(&out).unwrap(), input);
    }

    #[test_log::test]
    fn window_bit_patterns_cover_the_whole_range() {
        for wbits in 10u32..=24 {
            let mut w = BitWriter::new();
            write_window_bits(&mut w, wbits);
            w.write(1, 1);
            w.write(1, 1);
            let bytes = w.finish();
            assert_eq!(
                crate::decoder::decompress(&bytes).unwrap(),
                Vec::<u8>::new(),
                "wbits {}",
                wbits
            );
        }
    }

    #[test_log::test]
    fn repeated_bytes_compress_to_a_copy() {
        let input = vec![b'A'; 100];
        let out = compress(&input);
        assert!(out.len() < 20, "compressed to {} bytes", out.len());
        assert_eq!(crate::decoder::decompress(&out).unwrap(), input);
    }

    #[test_log::test]
    fn custom_window_is_honored() {
        let input: Vec<u8> = b"0123456789abcdef".repeat(400);
        let options = CompressOptions { window_bits: 10 };
        let out = compress_with(&input, &options);
        assert_eq!(crate::decoder::decompress(&out).unwrap(), input);
    }
}
