//! Hierarchy chunk (`.hrc`) parsing.

use std::collections::VecDeque;

use crate::error::{DecodeError, DecodeResult};
use crate::name::child_name;

/// Size of one hierarchy record: child mask (u8) + point count (u32 LE).
pub const HIERARCHY_RECORD_SIZE: usize = 5;

/// One node described by a hierarchy chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    /// Full node name, e.g. `"r0412"`.
    pub name: String,
    /// Bit `i` set means child `i` exists.
    pub child_mask: u8,
    /// Number of points stored in the node's file.
    pub num_points: u32,
}

impl HierarchyEntry {
    /// True if at least one child exists.
    #[must_use]
    pub fn has_children(&self) -> bool {
        self.child_mask != 0
    }
}

/// Parse the hierarchy chunk rooted at `root_name`.
///
/// Records are stored breadth-first: the first describes `root_name`, then
/// for every parsed node, one record per set bit of its child mask in
/// ascending octant order. The chunk ends where the data ends; children of
/// the deepest nodes are described by the next chunk.
///
/// The returned entries start with the chunk root and are in file order.
///
/// # Errors
///
/// Returns an error if the buffer is empty or not a whole number of records.
pub fn parse_hierarchy(root_name: &str, data: &[u8]) -> DecodeResult<Vec<HierarchyEntry>> {
    if data.len() < HIERARCHY_RECORD_SIZE {
        return Err(DecodeError::BufferTooSmall {
            expected: HIERARCHY_RECORD_SIZE,
            actual: data.len(),
        });
    }
    if !data.len().is_multiple_of(HIERARCHY_RECORD_SIZE) {
        return Err(DecodeError::MisalignedBuffer {
            len: data.len(),
            record_size: HIERARCHY_RECORD_SIZE,
        });
    }

    let mut records = data.chunks_exact(HIERARCHY_RECORD_SIZE);
    let mut entries = Vec::with_capacity(data.len() / HIERARCHY_RECORD_SIZE);

    let Some(first) = records.next() else {
        return Ok(entries);
    };
    entries.push(read_record(root_name.to_string(), first));

    // Indices into `entries` whose children are still to be read.
    let mut pending: VecDeque<usize> = VecDeque::from([0]);

    'outer: while let Some(parent) = pending.pop_front() {
        let mask = entries[parent].child_mask;
        for index in 0..8u8 {
            if mask & (1 << index) == 0 {
                continue;
            }
            let Some(record) = records.next() else {
                break 'outer;
            };
            let name = child_name(&entries[parent].name, index)?;
            entries.push(read_record(name, record));
            pending.push_back(entries.len() - 1);
        }
    }

    Ok(entries)
}

fn read_record(name: String, record: &[u8]) -> HierarchyEntry {
    HierarchyEntry {
        name,
        child_mask: record[0],
        num_points: u32::from_le_bytes([record[1], record[2], record[3], record[4]]),
    }
}
