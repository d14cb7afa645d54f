//! Line-based diff and diff3-style three-way merge.
//!
//! The merge walks base/local/remote line sequences and yields chunks, each
//! drawn from one side and flagged as conflicting or not. Conflicting chunks
//! are grouped into [`ConflictBlock`]s by their side: a block collects at most
//! one chunk per side and closes when a side repeats or a stable chunk follows.

use serde::{Deserialize, Serialize};

use super::types::ConflictBlock;

/// Upper bound on the LCS table size. Larger inputs are compared as a single
/// replaced region after trimming the common prefix and suffix.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Which input sequence a chunk was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Base = 0,
    Local = 1,
    Remote = 2,
}

impl Side {
    /// Position of the side in the `[base, local, remote]` triple.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One contiguous range `[start, end)` of a side's line sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeChunk {
    pub side: Side,
    pub conflicting: bool,
    pub start: usize,
    pub end: usize,
}

impl MergeChunk {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// A region where `a[a_start..a_start + a_len]` was replaced by
/// `b[b_start..b_start + b_len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub a_start: usize,
    pub a_len: usize,
    pub b_start: usize,
    pub b_len: usize,
}

/// Splits text into lines without their terminators.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

/// Computes the hunks that turn `a` into `b`.
pub fn diff_hunks(a: &[&str], b: &[&str]) -> Vec<Hunk> {
    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    if a_mid.is_empty() && b_mid.is_empty() {
        return Vec::new();
    }

    let matches = if a_mid.is_empty()
        || b_mid.is_empty()
        || (a_mid.len() + 1).saturating_mul(b_mid.len() + 1) > MAX_LCS_CELLS
    {
        Vec::new()
    } else {
        lcs_matches(a_mid, b_mid)
    };

    let mut hunks = Vec::new();
    let (mut ai, mut bi) = (0, 0);
    for (x, y) in matches
        .into_iter()
        .chain(std::iter::once((a_mid.len(), b_mid.len())))
    {
        if x > ai || y > bi {
            hunks.push(Hunk {
                a_start: prefix + ai,
                a_len: x - ai,
                b_start: prefix + bi,
                b_len: y - bi,
            });
        }
        ai = x + 1;
        bi = y + 1;
    }
    hunks
}

/// Returns index pairs of one longest common subsequence, in order.
fn lcs_matches(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut matches = Vec::with_capacity(table[0] as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            matches.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

#[derive(Debug, Clone, Copy)]
struct SideHunk {
    side: Side,
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

/// Outcome of a three-way merge over borrowed line sequences.
#[derive(Debug, Clone)]
pub struct MergeResult<'a> {
    sequences: [&'a [&'a str]; 3],
    pub chunks: Vec<MergeChunk>,
}

/// Merges `local` and `remote`, both derived from `base`.
pub fn merge3<'a>(
    base: &'a [&'a str],
    local: &'a [&'a str],
    remote: &'a [&'a str],
) -> MergeResult<'a> {
    let mut hunks: Vec<SideHunk> = Vec::new();
    for (side, other) in [(Side::Local, local), (Side::Remote, remote)] {
        hunks.extend(diff_hunks(base, other).into_iter().map(|h| SideHunk {
            side,
            base_start: h.a_start,
            base_end: h.a_start + h.a_len,
            side_start: h.b_start,
            side_end: h.b_start + h.b_len,
        }));
    }
    // Stable: local hunks precede remote hunks at the same base offset.
    hunks.sort_by_key(|h| h.base_start);

    let mut chunks = Vec::new();
    let mut cursor = 0;
    let mut idx = 0;

    while idx < hunks.len() {
        let region_start = hunks[idx].base_start;
        let mut region_end = hunks[idx].base_end;
        let mut region = vec![hunks[idx]];
        idx += 1;

        while idx < hunks.len() && hunks[idx].base_start <= region_end {
            region_end = region_end.max(hunks[idx].base_end);
            region.push(hunks[idx]);
            idx += 1;
        }

        if region_start > cursor {
            chunks.push(MergeChunk {
                side: Side::Base,
                conflicting: false,
                start: cursor,
                end: region_start,
            });
        }

        let local_range = side_range(&region, Side::Local, region_start, region_end);
        let remote_range = side_range(&region, Side::Remote, region_start, region_end);

        match (local_range, remote_range) {
            (Some((start, end)), None) => push_stable(&mut chunks, Side::Local, start, end),
            (None, Some((start, end))) => push_stable(&mut chunks, Side::Remote, start, end),
            (Some(l), Some(r)) => {
                if local[l.0..l.1] == remote[r.0..r.1] {
                    push_stable(&mut chunks, Side::Local, l.0, l.1);
                } else {
                    for (side, (start, end)) in [
                        (Side::Base, (region_start, region_end)),
                        (Side::Local, l),
                        (Side::Remote, r),
                    ] {
                        chunks.push(MergeChunk {
                            side,
                            conflicting: true,
                            start,
                            end,
                        });
                    }
                }
            }
            (None, None) => {}
        }

        cursor = region_end;
    }

    if cursor < base.len() {
        chunks.push(MergeChunk {
            side: Side::Base,
            conflicting: false,
            start: cursor,
            end: base.len(),
        });
    }

    MergeResult {
        sequences: [base, local, remote],
        chunks,
    }
}

fn push_stable(chunks: &mut Vec<MergeChunk>, side: Side, start: usize, end: usize) {
    if end > start {
        chunks.push(MergeChunk {
            side,
            conflicting: false,
            start,
            end,
        });
    }
}

/// Maps the base region onto one side, widening by the unchanged lines the
/// other side's hunks pulled into the region.
fn side_range(
    region: &[SideHunk],
    side: Side,
    region_start: usize,
    region_end: usize,
) -> Option<(usize, usize)> {
    let mut hunks = region.iter().filter(|h| h.side == side);
    let first = hunks.next()?;
    let (mut side_start, mut side_end) = (first.side_start, first.side_end);
    let (mut base_start, mut base_end) = (first.base_start, first.base_end);
    for h in hunks {
        side_start = side_start.min(h.side_start);
        side_end = side_end.max(h.side_end);
        base_start = base_start.min(h.base_start);
        base_end = base_end.max(h.base_end);
    }
    Some((
        side_start - (base_start - region_start),
        side_end + (region_end - base_end),
    ))
}

#[derive(Default)]
struct PendingBlock {
    ranges: [Option<(usize, usize)>; 3],
}

impl PendingBlock {
    fn is_empty(&self) -> bool {
        self.ranges.iter().all(Option::is_none)
    }
}

impl<'a> MergeResult<'a> {
    /// Returns true if at least one chunk is conflicting.
    pub fn has_conflicts(&self) -> bool {
        self.chunks.iter().any(|c| c.conflicting)
    }

    fn lines(&self, side: Side, range: Option<(usize, usize)>) -> Vec<String> {
        range
            .map(|(start, end)| {
                self.sequences[side.index()][start..end]
                    .iter()
                    .map(|l| l.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Groups conflicting chunks into blocks, tracking each block's line range in
    /// the merged output. Conflicted regions contribute their local lines to it.
    pub fn conflict_blocks(&self) -> Vec<ConflictBlock> {
        let mut blocks = Vec::new();
        let mut offset = 0;
        let mut pending = PendingBlock::default();

        for chunk in &self.chunks {
            if !chunk.conflicting {
                self.flush(&mut pending, &mut offset, &mut blocks);
                offset += chunk.len();
                continue;
            }
            if pending.ranges[chunk.side.index()].is_some() {
                self.flush(&mut pending, &mut offset, &mut blocks);
            }
            pending.ranges[chunk.side.index()] = Some((chunk.start, chunk.end));
        }
        self.flush(&mut pending, &mut offset, &mut blocks);

        blocks
    }

    fn flush(&self, pending: &mut PendingBlock, offset: &mut usize, blocks: &mut Vec<ConflictBlock>) {
        if pending.is_empty() {
            return;
        }
        let taken = std::mem::take(pending);
        let local_lines = self.lines(Side::Local, taken.ranges[Side::Local.index()]);
        let start_line = *offset;
        let end_line = start_line + local_lines.len();
        *offset = end_line;

        blocks.push(ConflictBlock {
            start_line,
            end_line,
            base_lines: self.lines(Side::Base, taken.ranges[Side::Base.index()]),
            local_lines,
            remote_lines: self.lines(Side::Remote, taken.ranges[Side::Remote.index()]),
        });
    }

    /// Merged lines with conflicted regions resolved to the local side.
    pub fn merged_lines(&self) -> Vec<&'a str> {
        let mut out = Vec::new();
        for chunk in &self.chunks {
            if chunk.conflicting && chunk.side != Side::Local {
                continue;
            }
            out.extend_from_slice(&self.sequences[chunk.side.index()][chunk.start..chunk.end]);
        }
        out
    }
}

/// Runs a three-way merge over whole texts and returns the conflict blocks.
pub fn conflict_blocks_for(base: &str, local: &str, remote: &str) -> Vec<ConflictBlock> {
    let base = split_lines(base);
    let local = split_lines(local);
    let remote = split_lines(remote);
    merge3(&base, &local, &remote).conflict_blocks()
}
