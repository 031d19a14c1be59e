//! Open-time crash recovery.
//!
//! The metadata record is written after all block and index bytes, so a
//! crash can leave committed blocks the metadata does not know about.  Three
//! bounded phases reconcile the two, in order:
//!
//! 1. **Orphan scan** — walk forward from the head; any nonzero block past
//!    it was committed without a metadata update, so the head advances onto
//!    it.  Stops at an empty block, at the tail, or after a full lap.
//! 2. **Tail normalisation** — the tail must name a primary block (or an
//!    empty slot); continuation blocks stranded at the tail are skipped.
//! 3. **Write-offset reconstruction** — recomputed from the head block
//!    alone: 0 when empty, `header + data_len` when packed, the block size
//!    when the head is a chain tail or a legacy whole-block object (both
//!    are finalised; nothing packs behind them).
//!
//! Recovery is idempotent: a second run over a recovered store changes no
//! metadata.  It persists only when a phase changed something, and a store
//! either recovers completely or fails to open.

use log::{debug, warn};

use crate::codec::BLOCK_HEADER_SIZE;
use crate::error::Result;
use crate::store::Core;

/// Reconcile metadata with block contents.  Returns whether anything was
/// repaired.
pub(crate) fn recover(core: &mut Core) -> Result<bool> {
    let before = core.meta;

    orphan_scan(core)?;
    normalize_tail(core)?;
    rebuild_write_offset(core)?;

    let changed = core.meta != before;
    if changed {
        warn!(
            "recovery repaired {}: head {} -> {}, tail {} -> {}, write_offset {} -> {}",
            core.dir.display(),
            before.head_block,
            core.meta.head_block,
            before.tail_block,
            core.meta.tail_block,
            before.write_offset,
            core.meta.write_offset,
        );
        core.persist_metadata()?;
        core.files.sync()?;
    } else {
        debug!("recovery found {} consistent", core.dir.display());
    }
    Ok(changed)
}

/// Phase 1: adopt blocks committed ahead of the recorded head.
fn orphan_scan(core: &mut Core) -> Result<()> {
    let n = core.num_blocks();
    for _ in 0..n {
        let next = (core.meta.head_block + 1) % n;
        if next == core.meta.tail_block {
            break;
        }
        let header = core.read_block_header(next)?;
        if header.is_empty() {
            break;
        }
        warn!("block {next} was committed without metadata, advancing head onto it");
        core.meta.head_block = next;
    }
    Ok(())
}

/// Phase 2: the tail must not point into the middle of a spanning chain.
fn normalize_tail(core: &mut Core) -> Result<()> {
    let n = core.num_blocks();
    for _ in 0..n {
        if core.meta.tail_block == core.meta.head_block {
            break;
        }
        let header = core.read_block_header(core.meta.tail_block)?;
        if !header.is_continuation() {
            break;
        }
        warn!(
            "tail block {} is a stray continuation, skipping it",
            core.meta.tail_block
        );
        core.meta.tail_block = (core.meta.tail_block + 1) % n;
    }
    Ok(())
}

/// Phase 3: derive the write offset from the head block contents.
fn rebuild_write_offset(core: &mut Core) -> Result<()> {
    let header = core.read_block_header(core.meta.head_block)?;
    core.meta.write_offset = if header.is_empty() {
        0
    } else if header.is_packed() && !header.is_continuation() {
        (BLOCK_HEADER_SIZE as u32 + header.data_len).min(core.meta.data_block_size)
    } else {
        core.meta.data_block_size
    };
    Ok(())
}
