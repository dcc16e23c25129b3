use crate::bits::BitReader;
use crate::command::{self, DistanceTag};
use crate::context::{literal_context, read_count, BlockState, ContextMap, ContextMode};
use crate::distance::{self, DistanceRing, ResolvedDistance};
use crate::error::{ErrorContext, ErrorKind, Res};
use crate::huffman::read_prefix_code;

const LITERAL_ALPHABET: usize = 256;

/// Decode a complete Brotli stream. Bytes after the last meta-block
/// are ignored.
pub fn decompress(input: &[u8]) -> Res<Vec<u8>> {
    Decoder::new(input).run()
}

/// Drives the meta-block loop. The output vector doubles as the
/// sliding window: distances are bounded by both the window size and
/// the bytes produced so far, so no separate ring storage is needed.
struct Decoder<'a> {
    r: BitReader<'a>,
    output: Vec<u8>,
    window_size: usize,
    ring: DistanceRing,
}

impl ErrorContext for Decoder<'_> {
    fn describe(&self) -> Option<String> {
        Some(format!(
            "bit {}, {} bytes decoded",
            self.r.bit_position(),
            self.output.len()
        ))
    }
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Decoder {
            r: BitReader::new(input),
            output: Vec::new(),
            window_size: 0,
            ring: DistanceRing::new(),
        }
    }

    fn run(mut self) -> Res<Vec<u8>> {
        self.window_size = self.read_window_size()?;
        log::debug!("window size {}", self.window_size);
        loop {
            let is_last = self.read_is_last()?;
            if is_last && self.r.read_bit()? {
                // ISEMPTY ends the stream on a byte boundary.
                self.r.align_to_byte();
                break;
            }
            let mnibbles = self.r.read(2)?;
            if mnibbles == 3 {
                self.check(
                    !is_last,
                    ErrorKind::ReservedBitSet,
                    "metadata meta-block marked as last",
                )?;
                self.skip_metadata()?;
                continue;
            }
            let nibbles = 4 + mnibbles;
            let mlen_minus_1 = self.r.read(nibbles * 4)?;
            if nibbles > 4 {
                self.check(
                    mlen_minus_1 >> ((nibbles - 1) * 4) != 0,
                    ErrorKind::ReservedBitSet,
                    "MLEN transmitted with spare nibbles",
                )?;
            }
            let mlen = mlen_minus_1 as usize + 1;
            log::debug!("meta-block of {} bytes, last: {}", mlen, is_last);

            if !is_last && self.r.read_bit()? {
                self.copy_uncompressed(mlen)?;
            } else {
                self.decode_compressed(mlen)?;
            }
            if is_last {
                break;
            }
        }
        Ok(self.output)
    }

    /// A cleanly exhausted input at a meta-block boundary means the
    /// last meta-block never arrived.
    fn read_is_last(&mut self) -> Res<bool> {
        match self.r.read_bit() {
            Err(e) if e.kind == ErrorKind::EndOfStream => self.raise(
                ErrorKind::TruncatedStream,
                "input ended between meta-blocks".into(),
            ),
            other => other,
        }
    }

    fn read_window_size(&mut self) -> Res<usize> {
        let wbits = if !self.r.read_bit()? {
            16
        } else {
            let w = self.r.read(3)?;
            if w != 0 {
                17 + w
            } else {
                let x = self.r.read(3)?;
                match x {
                    0 => 17,
                    1 => {
                        return self.raise(
                            ErrorKind::ReservedBitSet,
                            "reserved window size pattern".into(),
                        )
                    }
                    _ => 8 + x,
                }
            }
        };
        Ok((1usize << wbits) - 16)
    }

    fn skip_metadata(&mut self) -> Res<()> {
        let reserved = self.r.read_bit()?;
        self.check(!reserved, ErrorKind::ReservedBitSet, "reserved metadata bit")?;
        let skip_bytes = self.r.read(2)?;
        let skip_len = if skip_bytes == 0 {
            0
        } else {
            let v = self.r.read(skip_bytes * 8)?;
            if skip_bytes > 1 {
                self.check(
                    v >> ((skip_bytes - 1) * 8) != 0,
                    ErrorKind::ReservedBitSet,
                    "metadata length transmitted with spare bytes",
                )?;
            }
            v as usize + 1
        };
        self.r.align_to_byte();
        let mut skipped = vec![0u8; skip_len];
        let read = self.r.read_bytes(&mut skipped);
        self.at(read)?;
        log::debug!("skipped {} metadata bytes", skip_len);
        Ok(())
    }

    fn copy_uncompressed(&mut self, mlen: usize) -> Res<()> {
        self.r.align_to_byte();
        let at = self.output.len();
        self.output.resize(at + mlen, 0);
        let read = self.r.read_bytes(&mut self.output[at..]);
        if let Err(e) = read {
            self.output.truncate(at);
            return self.at(Err(e));
        }
        Ok(())
    }

    fn decode_compressed(&mut self, mlen: usize) -> Res<()> {
        let mut lit_blocks = BlockState::parse(&mut self.r)?;
        let mut cmd_blocks = BlockState::parse(&mut self.r)?;
        let mut dist_blocks = BlockState::parse(&mut self.r)?;

        let npostfix = self.r.read(2)?;
        let ndirect = self.r.read(4)? << npostfix;

        let mut modes = Vec::with_capacity(lit_blocks.num_types());
        for _ in 0..lit_blocks.num_types() {
            modes.push(ContextMode::from_bits(self.r.read(2)?));
        }

        let num_lit_trees = read_count(&mut self.r)?;
        let lit_map = if num_lit_trees >= 2 {
            ContextMap::parse(&mut self.r, lit_blocks.num_types(), 64, num_lit_trees)?
        } else {
            ContextMap::trivial(lit_blocks.num_types(), 64)
        };
        let num_dist_trees = read_count(&mut self.r)?;
        let dist_map = if num_dist_trees >= 2 {
            ContextMap::parse(&mut self.r, dist_blocks.num_types(), 4, num_dist_trees)?
        } else {
            ContextMap::trivial(dist_blocks.num_types(), 4)
        };

        let mut lit_codes = Vec::with_capacity(num_lit_trees as usize);
        for _ in 0..num_lit_trees {
            lit_codes.push(read_prefix_code(&mut self.r, LITERAL_ALPHABET)?);
        }
        let mut cmd_codes = Vec::with_capacity(cmd_blocks.num_types());
        for _ in 0..cmd_blocks.num_types() {
            cmd_codes.push(read_prefix_code(&mut self.r, command::ALPHABET_SIZE)?);
        }
        let dist_alphabet = distance::alphabet_size(npostfix, ndirect);
        let mut dist_codes = Vec::with_capacity(num_dist_trees as usize);
        for _ in 0..num_dist_trees {
            dist_codes.push(read_prefix_code(&mut self.r, dist_alphabet)?);
        }
        log::debug!(
            "tables ready: {} literal trees, {} command types, {} distance trees",
            num_lit_trees,
            cmd_blocks.num_types(),
            num_dist_trees
        );

        let mut written = 0usize;
        while written < mlen {
            let cmd_type = cmd_blocks.next(&mut self.r)?;
            let symbol = cmd_codes[cmd_type].read_symbol(&mut self.r)?;
            let code = command::unpack(symbol);
            let insert_len = command::read_insert_length(&mut self.r, code.insert_code)?;
            let copy_len = command::read_copy_length(&mut self.r, code.copy_code)?;

            self.check(
                written + insert_len <= mlen,
                ErrorKind::InvalidCommand,
                "insert run overshoots the meta-block",
            )?;
            for _ in 0..insert_len {
                let lit_type = lit_blocks.next(&mut self.r)?;
                let (p1, p2) = self.last_two();
                let context = literal_context(modes[lit_type], p1, p2);
                let tree = lit_map.lookup(lit_type, context as usize);
                let literal = lit_codes[tree].read_symbol(&mut self.r)?;
                self.output.push(literal as u8);
            }
            written += insert_len;
            if written == mlen {
                // The copy half of the final command is not used.
                break;
            }

            let resolved = match code.distance {
                DistanceTag::UseLastDistance => ResolvedDistance {
                    distance: self.ring.get(0),
                    updates_ring: false,
                },
                DistanceTag::Explicit => {
                    let dist_type = dist_blocks.next(&mut self.r)?;
                    let tree = dist_map.lookup(dist_type, distance::context_for(copy_len));
                    let dist_symbol = dist_codes[tree].read_symbol(&mut self.r)?;
                    let resolved = distance::read_distance(
                        &mut self.r,
                        dist_symbol as u32,
                        &self.ring,
                        npostfix,
                        ndirect,
                    );
                    self.at(resolved)?
                }
            };
            self.check(
                written + copy_len <= mlen,
                ErrorKind::InvalidCommand,
                "copy run overshoots the meta-block",
            )?;
            let dist = resolved.distance as usize;
            let reach = self.window_size.min(self.output.len());
            if dist > reach {
                // Also covers static dictionary references, which this
                // decoder does not support.
                return self.raise(
                    ErrorKind::InvalidDistance,
                    format!("distance {} with only {} bytes in reach", dist, reach),
                );
            }
            if resolved.updates_ring {
                self.ring.push(resolved.distance);
            }
            self.copy_back(dist, copy_len);
            written += copy_len;
        }
        Ok(())
    }

    fn last_two(&self) -> (u8, u8) {
        match self.output.as_slice() {
            [] => (0, 0),
            [p1] => (*p1, 0),
            [.., p2, p1] => (*p1, *p2),
        }
    }

    /// Copy |len| bytes starting |dist| back; for dist < len the copy
    /// overlaps what it appends, repeating the pattern. Each round can
    /// copy as much as has accumulated, so this runs in O(len).
    fn copy_back(&mut self, dist: usize, len: usize) {
        self.output.reserve(len);
        let from = self.output.len() - dist;
        let mut span = dist;
        let mut remaining = len;
        while remaining > 0 {
            let take = span.min(remaining);
            self.output.extend_from_within(from..from + take);
            remaining -= take;
            span += take;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;

    #[test_log::test]
    fn empty_input_is_not_a_stream() {
        let err = decompress(&[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EndOfStream);
    }

    // The one-byte empty stream: WBITS = 16, ISLAST, ISEMPTY.
    #[test_log::test]
    fn minimal_empty_stream_decodes() {
        assert_eq!(decompress(&[0x06]).unwrap(), Vec::<u8>::new());
    }

    #[test_log::test]
    fn trailing_garbage_after_the_last_block_is_ignored() {
        assert_eq!(decompress(&[0x06, 0xAA, 0xBB]).unwrap(), Vec::<u8>::new());
    }

    #[test_log::test]
    fn uncompressed_meta_blocks_pass_through() {
        let mut w = BitWriter::new();
        w.write(0, 1); // WBITS = 16
        w.write(0, 1); // ISLAST = 0
        w.write(0, 2); // MNIBBLES -> 4 nibbles
        w.write(4, 16); // MLEN = 5
        w.write(1, 1); // ISUNCOMPRESSED
        w.align();
        w.write_bytes(b"hello");
        w.write(1, 1); // ISLAST
        w.write(1, 1); // ISEMPTY
        let bytes = w.finish();
        assert_eq!(decompress(&bytes).unwrap(), b"hello");
    }

    #[test_log::test]
    fn missing_last_block_is_a_truncated_stream() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(0, 1);
        w.write(0, 2);
        w.write(0, 16); // MLEN = 1
        w.write(1, 1);
        w.align();
        w.write_bytes(b"x");
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TruncatedStream);
    }

    #[test_log::test]
    fn truncated_raw_bytes_are_end_of_stream() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(0, 1);
        w.write(0, 2);
        w.write(99, 16); // MLEN = 100, but no payload follows
        w.write(1, 1);
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EndOfStream);
    }

    #[test_log::test]
    fn metadata_blocks_are_skipped() {
        let mut w = BitWriter::new();
        w.write(0, 1); // WBITS = 16
        w.write(0, 1); // ISLAST = 0
        w.write(3, 2); // MNIBBLES pattern 11: metadata
        w.write(0, 1); // reserved
        w.write(1, 2); // MSKIPBYTES = 1
        w.write(3, 8); // MSKIPLEN = 4
        w.align();
        w.write_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        w.write(0, 1); // ISLAST = 0
        w.write(0, 2);
        w.write(1, 16); // MLEN = 2
        w.write(1, 1); // ISUNCOMPRESSED
        w.align();
        w.write_bytes(b"ok");
        w.write(1, 1);
        w.write(1, 1);
        let bytes = w.finish();
        assert_eq!(decompress(&bytes).unwrap(), b"ok");
    }

    #[test_log::test]
    fn metadata_reserved_bit_must_be_zero() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(0, 1);
        w.write(3, 2);
        w.write(1, 1); // reserved bit set
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservedBitSet);
    }

    #[test_log::test]
    fn last_metadata_block_is_rejected() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(1, 1); // ISLAST
        w.write(0, 1); // ISEMPTY = 0
        w.write(3, 2); // metadata
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservedBitSet);
    }

    #[test_log::test]
    fn spare_mlen_nibbles_are_rejected() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(0, 1);
        w.write(1, 2); // 5 nibbles
        w.write(100, 20); // top nibble zero
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservedBitSet);
    }

    #[test_log::test]
    fn reserved_window_pattern_is_rejected() {
        let mut w = BitWriter::new();
        w.write(1, 1);
        w.write(0, 3);
        w.write(1, 3); // the one invalid deep pattern
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservedBitSet);
    }

    #[test_log::test]
    fn small_window_sizes_decode() {
        // WBITS = 10 via the deep form, then one raw byte.
        let mut w = BitWriter::new();
        w.write(1, 1);
        w.write(0, 3);
        w.write(2, 3); // 8 + 2
        w.write(0, 1); // ISLAST = 0
        w.write(0, 2);
        w.write(0, 16); // MLEN = 1
        w.write(1, 1);
        w.align();
        w.write_bytes(b"q");
        w.write(1, 1);
        w.write(1, 1);
        let bytes = w.finish();
        assert_eq!(decompress(&bytes).unwrap(), b"q");
    }

    // A compressed meta-block written by hand out of degenerate codes:
    // one command (insert 0, copy 2) whose distance symbol names ring
    // slot 3 (16), far beyond the empty output.
    #[test_log::test]
    fn distances_beyond_output_are_invalid() {
        let mut w = BitWriter::new();
        w.write(0, 1); // WBITS = 16
        w.write(1, 1); // ISLAST
        w.write(0, 1); // ISEMPTY = 0
        w.write(0, 2); // 4 nibbles
        w.write(1, 16); // MLEN = 2
        w.write(0, 1); // one literal block type
        w.write(0, 1); // one command block type
        w.write(0, 1); // one distance block type
        w.write(0, 2); // NPOSTFIX
        w.write(0, 4); // NDIRECT
        w.write(0, 2); // context mode LSB6
        w.write(0, 1); // NTREESL = 1
        w.write(0, 1); // NTREESD = 1
        // literal code: single symbol 0
        w.write(1, 2);
        w.write(0, 2);
        w.write(0, 8);
        // command code: single symbol 128 (insert 0, copy 2, explicit)
        w.write(1, 2);
        w.write(0, 2);
        w.write(128, 10);
        // distance code: single symbol 3
        w.write(1, 2);
        w.write(0, 2);
        w.write(3, 6);
        // Body: every symbol is degenerate, so no bits at all.
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidDistance);
    }

    // Same skeleton, but the copy would run past MLEN.
    #[test_log::test]
    fn copy_overshooting_mlen_is_invalid() {
        let mut w = BitWriter::new();
        w.write(0, 1);
        w.write(1, 1);
        w.write(0, 1);
        w.write(0, 2);
        w.write(0, 16); // MLEN = 1: insert 0 + copy 2 overshoots
        for _ in 0..3 {
            w.write(0, 1);
        }
        w.write(0, 2);
        w.write(0, 4);
        w.write(0, 2);
        w.write(0, 1);
        w.write(0, 1);
        w.write(1, 2);
        w.write(0, 2);
        w.write(0, 8);
        w.write(1, 2);
        w.write(0, 2);
        w.write(128, 10);
        // distance code: single symbol 0 (reuse newest ring entry)
        w.write(1, 2);
        w.write(0, 2);
        w.write(0, 6);
        let bytes = w.finish();
        let err = decompress(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCommand);
    }

    #[test_log::test]
    fn overlapping_copies_repeat_the_pattern() {
        let mut d = Decoder::new(&[]);
        d.output.extend_from_slice(b"ab");
        d.copy_back(2, 6);
        assert_eq!(d.output, b"abababab");
    }
}
