//! Byte-pair merge engine.
//!
//! Given one piece of pre-tokenized text, repeatedly merge the adjacent pair
//! whose concatenation has the lowest rank, leftmost pair first on ties, until
//! no adjacent pair is a vocabulary entry. The ranks of the surviving parts
//! are the encoding of the piece.
//!
//! Two equivalent strategies are used:
//!
//! - short pieces: a flat vector of parts rescanned after every merge
//! - long pieces: a linked list of parts plus a min-heap of candidate pairs
//!   keyed by `(rank, position)`, with per-node generation counters so stale
//!   heap entries are skipped instead of removed. This keeps pathological
//!   inputs (long runs of one character) at O(n log n).
//!
//! Both select exactly the same merge at every step.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;

use super::vocab::{Rank, Vocabulary};

/// Pieces at or below this length use the linear strategy.
const HEAP_THRESHOLD: usize = 64;

const NONE: usize = usize::MAX;

/// One surviving part of a piece: its byte range and its rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub range: Range<usize>,
    pub rank: Rank,
}

/// Encode one piece into ranks.
///
/// An empty piece yields no ranks. A piece whose bytes never form a
/// multi-byte entry yields one single-byte rank per byte.
pub fn byte_pair_encode(piece: &[u8], vocab: &Vocabulary) -> Vec<Rank> {
    match piece.len() {
        0 => Vec::new(),
        1 => vec![vocab.byte_rank(piece[0])],
        _ => merge_parts(piece, vocab, |_| {})
            .into_iter()
            .map(|part| part.rank)
            .collect(),
    }
}

/// Split one piece into the byte slices its ranks stand for.
pub fn byte_pair_split<'a>(piece: &'a [u8], vocab: &Vocabulary) -> Vec<&'a [u8]> {
    if piece.is_empty() {
        return Vec::new();
    }
    merge_parts(piece, vocab, |_| {})
        .into_iter()
        .map(|part| &piece[part.range])
        .collect()
}

/// Run the merge loop, reporting the rank of every merge as it happens.
pub(crate) fn merge_parts<F>(piece: &[u8], vocab: &Vocabulary, on_merge: F) -> Vec<Part>
where
    F: FnMut(Rank),
{
    debug_assert!(!piece.is_empty());
    if piece.len() <= HEAP_THRESHOLD {
        merge_linear(piece, vocab, on_merge)
    } else {
        merge_heap(piece, vocab, on_merge)
    }
}

fn merge_linear<F>(piece: &[u8], vocab: &Vocabulary, mut on_merge: F) -> Vec<Part>
where
    F: FnMut(Rank),
{
    let mut parts: Vec<Part> = piece
        .iter()
        .enumerate()
        .map(|(i, &b)| Part {
            range: i..i + 1,
            rank: vocab.byte_rank(b),
        })
        .collect();

    // pair_ranks[i] is the rank of parts[i] merged with parts[i + 1]
    let pair_rank = |parts: &[Part], i: usize| -> Option<Rank> {
        let right = parts.get(i + 1)?;
        vocab.rank_of(&piece[parts[i].range.start..right.range.end])
    };
    let mut pair_ranks: Vec<Option<Rank>> =
        (0..parts.len()).map(|i| pair_rank(&parts, i)).collect();

    loop {
        let best = pair_ranks
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|r| (r, i)))
            .min();
        let Some((rank, i)) = best else {
            break;
        };
        on_merge(rank);

        let right_end = parts[i + 1].range.end;
        parts[i].range.end = right_end;
        parts[i].rank = rank;
        parts.remove(i + 1);
        pair_ranks.remove(i + 1);

        pair_ranks[i] = pair_rank(&parts, i);
        if i > 0 {
            pair_ranks[i - 1] = pair_rank(&parts, i - 1);
        }
    }

    parts
}

#[derive(Debug, Clone)]
struct Node {
    start: usize,
    end: usize,
    rank: Rank,
    prev: usize,
    next: usize,
    alive: bool,
    generation: u32,
}

fn merge_heap<F>(piece: &[u8], vocab: &Vocabulary, mut on_merge: F) -> Vec<Part>
where
    F: FnMut(Rank),
{
    let n = piece.len();
    let mut nodes: Vec<Node> = piece
        .iter()
        .enumerate()
        .map(|(i, &b)| Node {
            start: i,
            end: i + 1,
            rank: vocab.byte_rank(b),
            prev: if i == 0 { NONE } else { i - 1 },
            next: if i + 1 < n { i + 1 } else { NONE },
            alive: true,
            generation: 0,
        })
        .collect();

    let pair_rank = |nodes: &[Node], i: usize| -> Option<Rank> {
        let j = nodes[i].next;
        if j == NONE {
            return None;
        }
        vocab.rank_of(&piece[nodes[i].start..nodes[j].end])
    };

    // (rank, node index, generation at push); node indices follow byte order,
    // so the heap minimum is the lowest rank and then the leftmost pair.
    let mut heap: BinaryHeap<Reverse<(Rank, usize, u32)>> = BinaryHeap::with_capacity(n);
    for i in 0..n - 1 {
        if let Some(rank) = pair_rank(&nodes, i) {
            heap.push(Reverse((rank, i, 0)));
        }
    }

    while let Some(Reverse((rank, i, generation))) = heap.pop() {
        if !nodes[i].alive || nodes[i].generation != generation {
            continue;
        }
        let j = nodes[i].next;
        debug_assert!(j != NONE && nodes[j].alive);
        on_merge(rank);

        let k = nodes[j].next;
        nodes[j].alive = false;
        nodes[i].end = nodes[j].end;
        nodes[i].rank = rank;
        nodes[i].next = k;
        nodes[i].generation += 1;
        if k != NONE {
            nodes[k].prev = i;
        }

        if let Some(r) = pair_rank(&nodes, i) {
            heap.push(Reverse((r, i, nodes[i].generation)));
        }

        let p = nodes[i].prev;
        if p != NONE {
            nodes[p].generation += 1;
            if let Some(r) = pair_rank(&nodes, p) {
                heap.push(Reverse((r, p, nodes[p].generation)));
            }
        }
    }

    let mut parts = Vec::new();
    let mut i = 0;
    while i != NONE {
        let node = &nodes[i];
        parts.push(Part {
            range: node.start..node.end,
            rank: node.rank,
        });
        i = node.next;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vocab(merges: &[&[u8]]) -> Vocabulary {
        let mut pairs: Vec<(Vec<u8>, Rank)> =
            (0u16..256).map(|b| (vec![b as u8], b as Rank)).collect();
        for (i, m) in merges.iter().enumerate() {
            pairs.push((m.to_vec(), 256 + i as Rank));
        }
        Vocabulary::from_pairs(pairs).unwrap()
    }

    fn ranks(parts: &[Part]) -> Vec<Rank> {
        parts.iter().map(|p| p.rank).collect()
    }

    #[test]
    fn test_empty_piece() {
        let vocab = make_vocab(&[]);
        assert!(byte_pair_encode(b"", &vocab).is_empty());
        assert!(byte_pair_split(b"", &vocab).is_empty());
    }

    #[test]
    fn test_single_byte() {
        let vocab = make_vocab(&[]);
        assert_eq!(byte_pair_encode(b"a", &vocab), vec![b'a' as Rank]);
    }

    #[test]
    fn test_no_merges_falls_back_to_bytes() {
        let vocab = make_vocab(&[b"ab"]);
        let piece = [0xffu8; 10];
        assert_eq!(byte_pair_encode(&piece, &vocab), vec![0xff; 10]);
    }

    #[test]
    fn test_lowest_rank_first() {
        // "bc" outranks "ab", so "abc" -> "a" + "bc"
        let vocab = make_vocab(&[b"bc", b"ab"]);
        assert_eq!(byte_pair_encode(b"abc", &vocab), vec![b'a' as Rank, 256]);
        assert_eq!(
            byte_pair_split(b"abc", &vocab),
            vec![b"a".as_slice(), b"bc".as_slice()]
        );
    }

    #[test]
    fn test_leftmost_on_tie() {
        // "aaa": both pairs are "aa" (rank 256); the left one merges first
        let vocab = make_vocab(&[b"aa"]);
        assert_eq!(
            byte_pair_split(b"aaa", &vocab),
            vec![b"aa".as_slice(), b"a".as_slice()]
        );
    }

    #[test]
    fn test_merged_symbol_merges_again() {
        let vocab = make_vocab(&[b"he", b"ll", b"hell", b"hello"]);
        assert_eq!(byte_pair_encode(b"hello", &vocab), vec![259]);
        assert_eq!(byte_pair_encode(b"hellohe", &vocab), vec![259, 256]);
    }

    #[test]
    fn test_merge_ranks_never_decrease() {
        let vocab = make_vocab(&[b"ab", b"cd", b"abcd", b"ef", b"abcdef"]);
        let mut seen = Vec::new();
        let parts = merge_parts(b"abcdefab", &vocab, |r| seen.push(r));
        assert_eq!(ranks(&parts), vec![260, 256]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    }

    #[test]
    fn test_linear_and_heap_agree() {
        let vocab = make_vocab(&[b"aa", b"ab", b"aaaa", b"ba", b"abab", b"aab"]);
        let inputs: Vec<Vec<u8>> = vec![
            b"aaaaaaaaab".to_vec(),
            b"abababababa".to_vec(),
            b"baaabaaabaab".repeat(3),
            (0u8..=255).collect(),
        ];
        for input in inputs {
            let linear = merge_linear(&input, &vocab, |_| {});
            let heap = merge_heap(&input, &vocab, |_| {});
            assert_eq!(linear, heap, "strategies disagree on {:?}", input);
        }
    }

    #[test]
    fn test_long_run_uses_heap_and_covers_input() {
        let vocab = make_vocab(&[b"aa", b"aaaa", b"aaaaaaaa"]);
        let piece = vec![b'a'; 1000];
        let parts = merge_parts(&piece, &vocab, |_| {});
        assert_eq!(parts.len(), 1000 / 8);
        assert!(parts.iter().all(|p| p.rank == 258));

        let mut covered = 0;
        for part in &parts {
            assert_eq!(part.range.start, covered);
            covered = part.range.end;
        }
        assert_eq!(covered, piece.len());
    }

    /// Rescan every pair after every merge and take the minimum.
    fn greedy_reference(piece: &[u8], vocab: &Vocabulary) -> Vec<Rank> {
        let mut parts: Vec<Vec<u8>> = piece.iter().map(|&b| vec![b]).collect();
        loop {
            let mut best: Option<(Rank, usize)> = None;
            for i in 0..parts.len().saturating_sub(1) {
                let merged = [parts[i].as_slice(), parts[i + 1].as_slice()].concat();
                if let Some(rank) = vocab.rank_of(&merged) {
                    if best.map_or(true, |(r, _)| rank < r) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, i)) = best else { break };
            let right = parts.remove(i + 1);
            parts[i].extend(right);
        }
        parts.iter().map(|p| vocab.rank_of(p).unwrap()).collect()
    }

    fn overlapping_vocab() -> Vocabulary {
        make_vocab(&[
            b"ab", b"ca", b"bc", b"aa", b"abc", b"cab", b"aab", b"abab", b"cc",
        ])
    }

    proptest::proptest! {
        #[test]
        fn prop_both_strategies_pick_the_greedy_merge(piece in "[abc]{1,160}") {
            let vocab = overlapping_vocab();
            let piece = piece.as_bytes();
            let expected = greedy_reference(piece, &vocab);
            proptest::prop_assert_eq!(&ranks(&merge_linear(piece, &vocab, |_| {})), &expected);
            proptest::prop_assert_eq!(&ranks(&merge_heap(piece, &vocab, |_| {})), &expected);
        }
    }

    #[test]
    fn test_repeated_byte_without_entries() {
        let vocab = make_vocab(&[]);
        let piece = vec![b'z'; 200];
        let tokens = byte_pair_encode(&piece, &vocab);
        assert_eq!(tokens.len(), 200);
        assert!(tokens.iter().all(|&t| t == b'z' as Rank));
    }
}
