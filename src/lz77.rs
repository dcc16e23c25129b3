/// Minimum back-reference length worth a copy command.
pub const MIN_MATCH: usize = 4;
/// Longest copy a single command may carry.
pub const MAX_MATCH: usize = 1 << 24;

const HASH_BITS: u32 = 15;
const HASH_MUL: u32 = 0x1E35_A7BD;
const EMPTY: u32 = u32::MAX;

/// One parsed run of input: pending literals followed by an optional
/// back reference. A trailing literal-only run has |copy_len| 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub insert: std::ops::Range<usize>,
    pub copy_len: usize,
    pub distance: usize,
}

/// Greedy single-probe match finder over a four-byte rolling hash. The
/// table persists across meta-block chunks so references may reach back
/// into earlier chunks, bounded by the window.
pub struct MatchFinder {
    head: Vec<u32>,
}

impl MatchFinder {
    pub fn new() -> Self {
        MatchFinder {
            head: vec![EMPTY; 1 << HASH_BITS],
        }
    }

    fn hash(input: &[u8], pos: usize) -> usize {
        let word = u32::from_le_bytes([
            input[pos],
            input[pos + 1],
            input[pos + 2],
            input[pos + 3],
        ]);
        (word.wrapping_mul(HASH_MUL) >> (32 - HASH_BITS)) as usize
    }

    /// Parse |input[start..end]| into commands. Matches never extend
    /// past |end| and never reach further back than |max_distance|.
    pub fn commands(
        &mut self,
        input: &[u8],
        start: usize,
        end: usize,
        max_distance: usize,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        let insert_limit = (end + 1).saturating_sub(MIN_MATCH);
        let mut literals_from = start;
        let mut pos = start;
        while pos < insert_limit {
            let slot = Self::hash(input, pos);
            let candidate = self.head[slot];
            self.head[slot] = pos as u32;
            if candidate != EMPTY {
                let cand = candidate as usize;
                let distance = pos - cand;
                if distance <= max_distance && input[cand..cand + MIN_MATCH] == input[pos..pos + MIN_MATCH] {
                    let limit = (end - pos).min(MAX_MATCH);
                    let mut len = MIN_MATCH;
                    while len < limit && input[cand + len] == input[pos + len] {
                        len += 1;
                    }
                    commands.push(Command {
                        insert: literals_from..pos,
                        copy_len: len,
                        distance,
                    });
                    for p in pos + 1..(pos + len).min(insert_limit) {
                        self.head[Self::hash(input, p)] = p as u32;
                    }
                    pos += len;
                    literals_from = pos;
                    continue;
                }
            }
            pos += 1;
        }
        if literals_from < end {
            commands.push(Command {
                insert: literals_from..end,
                copy_len: 0,
                distance: 0,
            });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_coverage(commands: &[Command]) -> usize {
        commands.iter().map(|c| c.insert.len() + c.copy_len).sum()
    }

    #[test_log::test]
    fn a_run_collapses_to_one_distance_one_copy() {
        let input = vec![b'A'; 100];
        let mut finder = MatchFinder::new();
        let commands = finder.commands(&input, 0, 100, 1 << 20);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].insert, 0..1);
        assert_eq!(commands[0].copy_len, 99);
        assert_eq!(commands[0].distance, 1);
    }

    #[test_log::test]
    fn repeated_phrases_become_back_references() {
        let input: Vec<u8> = b"Hello, World! ".iter().copied().cycle().take(140).collect();
        let mut finder = MatchFinder::new();
        let commands = finder.commands(&input, 0, input.len(), 1 << 20);
        assert_eq!(total_coverage(&commands), input.len());
        // The first period is literal, the rest is one long match.
        let copied: usize = commands.iter().map(|c| c.copy_len).sum();
        assert!(copied >= 126 - MIN_MATCH, "copied only {}", copied);
        assert!(commands.iter().all(|c| c.copy_len == 0 || c.copy_len >= MIN_MATCH));
        assert!(commands.iter().all(|c| c.copy_len == 0 || c.distance >= 1));
    }

    #[test_log::test]
    fn incompressible_input_is_all_literals() {
        let input: Vec<u8> = (0u32..256).map(|i| i as u8).collect();
        let mut finder = MatchFinder::new();
        let commands = finder.commands(&input, 0, input.len(), 1 << 20);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].insert, 0..256);
        assert_eq!(commands[0].copy_len, 0);
    }

    #[test_log::test]
    fn matches_respect_the_window() {
        // Two copies of a phrase 40 bytes apart, window of 16.
        let mut input = vec![0u8; 80];
        input[0..8].copy_from_slice(b"ABCDEFGH");
        input[40..48].copy_from_slice(b"ABCDEFGH");
        let mut finder = MatchFinder::new();
        let commands = finder.commands(&input, 0, input.len(), 16);
        for c in &commands {
            assert!(c.distance <= 16, "distance {} over the window", c.distance);
        }
        assert_eq!(total_coverage(&commands), input.len());
    }

    #[test_log::test]
    fn chunk_boundary_stops_match_extension() {
        let input = vec![b'z'; 64];
        let mut finder = MatchFinder::new();
        let first = finder.commands(&input, 0, 32, 1 << 20);
        assert_eq!(total_coverage(&first), 32);
        // The second chunk may reference the first.
        let second = finder.commands(&input, 32, 64, 1 << 20);
        assert_eq!(total_coverage(&second), 32);
        assert!(second.iter().all(|c| c.insert.start >= 32));
    }

    #[test_log::test]
    fn short_repeats_stay_literal() {
        // "abcabc": the repeat is only 3 long.
        let input = b"abcabc".to_vec();
        let mut finder = MatchFinder::new();
        let commands = finder.commands(&input, 0, input.len(), 1 << 20);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].copy_len, 0);
    }
}
