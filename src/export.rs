//! Reading the log back out.
//!
//! The record view is the concatenation of every claimed block's record
//! words, read backward from the newest block: word 0 is the last word
//! written. Snapshots decode whole blocks in the order they were opened.
//!
//! Blocks still being written end at their CPU's cursor; closed blocks end
//! at their fill mark. Readers expect tracing to be off.

use alloc::vec::Vec;
use core::ops::Range;

use crate::arena::{Arena, header_words};
use crate::claim::{CpuCursor, UNSET};
use crate::codec::{BlockHeader, Word0, entry_length};
use crate::platform::{TASK_NAME_LEN, TaskIdentity};

/// The arena together with the cursors of the CPUs writing into it.
pub struct LogView<'a> {
    arena: &'a Arena,
    cursors: &'a [CpuCursor],
}

impl<'a> LogView<'a> {
    pub fn new(arena: &'a Arena, cursors: &'a [CpuCursor]) -> Self {
        Self { arena, cursors }
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Record words of block `k`.
    pub fn record_region(&self, k: usize) -> Range<usize> {
        let end = if self.arena.is_open(k) {
            self.cursor_end(k).unwrap_or(0)
        } else {
            0
        };
        self.arena.record_region(k, end)
    }

    /// Write position of the CPU that owns block `k`.
    fn cursor_end(&self, k: usize) -> Option<usize> {
        self.cursors.iter().find_map(|c| {
            let limit = c.limit();
            (limit != UNSET && self.arena.block_of(limit - 1) == k).then(|| c.next().min(limit))
        })
    }
}

/// Record words in the log.
pub fn record_count(view: &LogView<'_>) -> usize {
    view.arena()
        .blocks_newest_first()
        .map(|k| view.record_region(k).len())
        .sum()
}

/// `i`-th record word counting back from the newest. 0 past the end.
pub fn record_word(view: &LogView<'_>, mut i: usize) -> u64 {
    let arena = view.arena();
    for k in arena.blocks_newest_first() {
        let region = view.record_region(k);
        if i < region.len() {
            return arena.word(region.end - 1 - i);
        }
        i -= region.len();
    }
    0
}

/// One decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    /// Block index, counted down from the top of the arena.
    pub index: usize,
    pub header: BlockHeader,
    /// Task running when the block was opened.
    pub task: TaskIdentity,
    /// Record words in storage order.
    pub words: Vec<u64>,
    /// IPC byte of each record word; empty unless the block has the IPC flag.
    pub ipc: Vec<u8>,
}

/// One record inside a [`BlockSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub word0: Word0,
    pub raw: u64,
    pub payload: &'a [u64],
    pub ipc: Option<u8>,
}

impl BlockSnapshot {
    fn read(view: &LogView<'_>, k: usize) -> Self {
        let arena = view.arena();
        let start = arena.block_start(k);
        let header = BlockHeader::decode(arena.word(start), arena.word(start + 1));
        let task_at = start + header_words(k) - 4;

        let mut name = [0u8; TASK_NAME_LEN];
        name[..8].copy_from_slice(&arena.word(task_at + 2).to_le_bytes());
        name[8..].copy_from_slice(&arena.word(task_at + 3).to_le_bytes());
        let task = TaskIdentity {
            pid: arena.word(task_at) as u32,
            name,
        };

        let region = view.record_region(k);
        let words = region.clone().map(|w| arena.word(w)).collect();
        let ipc = if header.ipc_enabled() {
            region.map(|w| arena.ipc_byte(w)).collect()
        } else {
            Vec::new()
        };

        Self {
            index: k,
            header,
            task,
            words,
            ipc,
        }
    }

    /// Records in storage order. Zero words (padding and unused sentinel
    /// space) are skipped.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        let mut i = 0;
        core::iter::from_fn(move || {
            while i < self.words.len() {
                let raw = self.words[i];
                if raw == 0 {
                    i += 1;
                    continue;
                }
                let len = entry_length(raw).clamp(1, self.words.len() - i);
                let record = Record {
                    word0: Word0::decode(raw),
                    raw,
                    payload: &self.words[i + 1..i + len],
                    ipc: self.ipc.get(i).copied(),
                };
                i += len;
                return Some(record);
            }
            None
        })
    }
}

/// Decoded copy of the whole log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSnapshot {
    pub wrapped: bool,
    /// Blocks in the order they were opened.
    pub blocks: Vec<BlockSnapshot>,
}

impl TraceSnapshot {
    pub fn capture(view: &LogView<'_>) -> Self {
        let mut blocks: Vec<BlockSnapshot> = view
            .arena()
            .blocks_newest_first()
            .map(|k| BlockSnapshot::read(view, k))
            .collect();
        blocks.reverse();
        Self {
            wrapped: view.arena().is_wrapped(),
            blocks,
        }
    }

    pub fn word_count(&self) -> usize {
        self.blocks.iter().map(|b| b.words.len()).sum()
    }

    /// Records of all blocks for one CPU, oldest first.
    pub fn records_for_cpu(&self, cpu: u8) -> impl Iterator<Item = Record<'_>> + '_ {
        self.blocks
            .iter()
            .filter(move |b| b.header.cpu == cpu)
            .flat_map(|b| b.records())
    }
}

/// Log a summary of each block.
pub fn log_snapshot(snapshot: &TraceSnapshot) {
    info!(
        "[trace] blocks={} words={} wrapped={}",
        snapshot.blocks.len(),
        snapshot.word_count(),
        snapshot.wrapped
    );
    for block in &snapshot.blocks {
        info!(
            "[trace] block={} cpu={} ts={:#x} flags={:#04x} pid={} name={} words={}",
            block.index,
            block.header.cpu,
            block.header.timestamp,
            block.header.flags,
            block.task.pid,
            block.task.name_str(),
            block.words.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BLOCK_WORDS;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_records_skip_zero_and_use_length() {
        let block = BlockSnapshot {
            index: 1,
            header: BlockHeader::decode(0, 0),
            task: TaskIdentity::idle(),
            words: alloc::vec![0x0000_0200_0000_0001, 0, 0x0000_0030_0000_0000, 5, 6, 0],
            ipc: Vec::new(),
        };
        let recs: Vec<_> = block.records().collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].word0.event, 0x200);
        assert_eq!(recs[1].payload, &[5, 6]);
        assert_eq!(recs[1].ipc, None);
    }

    #[test]
    fn test_truncated_record_clamped() {
        let block = BlockSnapshot {
            index: 1,
            header: BlockHeader::decode(0, 0),
            task: TaskIdentity::idle(),
            words: alloc::vec![0x0000_0080_0000_0000, 1],
            ipc: Vec::new(),
        };
        let recs: Vec<_> = block.records().collect();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].payload, &[1]);
    }

    #[test]
    fn test_empty_arena() {
        let a = Arena::new(2);
        a.reset(false);
        let view = LogView::new(&a, &[]);
        assert_eq!(record_count(&view), 0);
        assert_eq!(record_word(&view, 0), 0);
        assert!(TraceSnapshot::capture(&view).blocks.is_empty());
        assert_eq!(a.raw_word(BLOCK_WORDS), 0);
    }

    #[test]
    fn test_open_block_ends_at_cursor() {
        let a = Arena::new(2);
        a.reset(false);
        let open = a.open_block(false).unwrap();
        a.open_fill(0);
        let cursors = [CpuCursor::new()];
        cursors[0].limit.store(open.start + BLOCK_WORDS, Ordering::Relaxed);
        cursors[0].next.store(open.start + 15, Ordering::Relaxed);
        let view = LogView::new(&a, &cursors);
        assert_eq!(record_count(&view), 3);

        // a closed block ignores the cursor
        a.close_fill(0, open.start + 13);
        assert_eq!(record_count(&view), 1);
    }
}
