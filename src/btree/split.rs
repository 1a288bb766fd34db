//! Byte-size split policy for leaf and branch nodes.
//!
//! With variable-length cells, splitting at the middle cell *count* can
//! produce a half that still overflows (one huge cell next to many tiny
//! ones). The split point is therefore chosen by cumulative byte size:
//!
//! 1. Scan cells left to right, accumulating serialized size.
//! 2. Prefer the smallest index where the left half exceeds half the
//!    usable capacity.
//! 3. If that index leaves either half oversized, fall back to the first
//!    index where both halves fit.
//! 4. If no index produces two fitting halves, the cell set cannot be
//!    stored and the insertion is rejected with `ValueTooLarge`.
//!
//! Leaf splits copy the separator (the right half's first key) up to the
//! parent. Branch splits promote the chosen separator: it moves to the
//! parent and is removed from both halves.

use super::node::{branch_cell_size, leaf_cell_size, BRANCH_HEADER_SIZE, LEAF_HEADER_SIZE};
use crate::error::{Error, PageId, Result};

/// Result of splitting a leaf's cell set.
#[derive(Debug)]
pub struct LeafSplit {
    /// Cells for the left (original position) leaf.
    pub left: Vec<(Vec<u8>, Vec<u8>)>,
    /// Cells for the new right leaf.
    pub right: Vec<(Vec<u8>, Vec<u8>)>,
    /// Separator promoted to the parent: a copy of the right leaf's
    /// smallest key.
    pub separator: Vec<u8>,
}

/// Result of splitting a branch node.
#[derive(Debug)]
pub struct BranchSplit {
    /// Keys and children for the left branch.
    pub left_keys: Vec<Vec<u8>>,
    /// Children of the left branch (`left_keys.len() + 1` entries).
    pub left_children: Vec<PageId>,
    /// Keys and children for the right branch.
    pub right_keys: Vec<Vec<u8>>,
    /// Children of the right branch (`right_keys.len() + 1` entries).
    pub right_children: Vec<PageId>,
    /// Separator promoted to the parent (removed from both halves).
    pub separator: Vec<u8>,
}

/// Chooses a split index by cumulative byte size.
///
/// `sizes` are the serialized cell sizes; a valid index `i` (1..len)
/// splits into `[..i]` and `[i..]` with both sides at most `capacity`.
fn split_index(sizes: &[usize], capacity: usize) -> Result<usize> {
    let total: usize = sizes.iter().sum();

    // Preferred point: left half first exceeds capacity/2.
    let mut acc = 0usize;
    let mut preferred = sizes.len();
    for (i, size) in sizes.iter().enumerate() {
        acc += size;
        if acc > capacity / 2 {
            preferred = i + 1;
            break;
        }
    }

    let fits = |i: usize| -> bool {
        let left: usize = sizes[..i].iter().sum();
        left <= capacity && total - left <= capacity
    };

    if preferred >= 1 && preferred < sizes.len() && fits(preferred) {
        return Ok(preferred);
    }

    // Fall back to any index where both halves fit. This is the path taken
    // when a single oversized cell dominates one side.
    for i in 1..sizes.len() {
        if fits(i) {
            return Ok(i);
        }
    }

    let max_cell = sizes.iter().copied().max().unwrap_or(0);
    Err(Error::ValueTooLarge { size: max_cell, max: capacity })
}

/// Splits an overflowing leaf cell set into two fitting halves.
///
/// `capacity` is the payload room available for cells (page payload minus
/// the leaf header).
///
/// # Errors
///
/// Returns [`Error::ValueTooLarge`] if no split point produces two halves
/// that each fit.
pub fn split_leaf_cells(
    cells: Vec<(Vec<u8>, Vec<u8>)>,
    payload_capacity: usize,
) -> Result<LeafSplit> {
    let capacity = payload_capacity - LEAF_HEADER_SIZE;
    let sizes: Vec<usize> = cells.iter().map(|(k, v)| leaf_cell_size(k, v)).collect();
    let at = split_index(&sizes, capacity)?;

    let mut left = cells;
    let right = left.split_off(at);
    let separator = right[0].0.clone();

    Ok(LeafSplit { left, right, separator })
}

/// Splits an overflowing branch into two halves, promoting one separator.
///
/// The promoted key is removed from both halves: left keeps `keys[..at]`
/// with `children[..at+1]`, right keeps `keys[at+1..]` with
/// `children[at+1..]`.
///
/// # Errors
///
/// Returns [`Error::ValueTooLarge`] if no split point produces two halves
/// that each fit.
pub fn split_branch_cells(
    keys: Vec<Vec<u8>>,
    children: Vec<PageId>,
    payload_capacity: usize,
) -> Result<BranchSplit> {
    debug_assert_eq!(children.len(), keys.len() + 1);
    let capacity = payload_capacity - BRANCH_HEADER_SIZE;
    let sizes: Vec<usize> = keys.iter().map(|k| branch_cell_size(k)).collect();

    // The promoted key at index i leaves the node entirely: left keeps
    // keys[..i], right keeps keys[i+1..]. Prefer the smallest promotion
    // index where the left half crosses half the capacity, then fall back
    // to any index where both halves fit.
    let fits = |i: usize| -> bool {
        let left: usize = sizes[..i].iter().sum();
        let right: usize = sizes[i + 1..].iter().sum();
        left <= capacity && right <= capacity
    };

    let mut preferred = keys.len() / 2;
    let mut acc = 0usize;
    for (i, size) in sizes.iter().enumerate() {
        acc += size;
        if acc > capacity / 2 {
            preferred = i;
            break;
        }
    }
    let preferred = preferred.min(keys.len() - 1);

    let promote = if fits(preferred) {
        preferred
    } else {
        match (0..keys.len()).find(|&i| fits(i)) {
            Some(i) => i,
            None => {
                let max_cell = sizes.iter().copied().max().unwrap_or(0);
                return Err(Error::ValueTooLarge { size: max_cell, max: capacity });
            },
        }
    };

    let mut left_keys = keys;
    let mut right_keys = left_keys.split_off(promote);
    let separator = right_keys.remove(0);

    let mut left_children = children;
    let right_children = left_children.split_off(promote + 1);

    Ok(BranchSplit { left_keys, left_children, right_keys, right_children, separator })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::usable_page_size;

    const PAGE_SIZE: usize = 4096;

    fn payload_capacity() -> usize {
        usable_page_size(PAGE_SIZE)
    }

    fn leaf_bytes(cells: &[(Vec<u8>, Vec<u8>)]) -> usize {
        LEAF_HEADER_SIZE + cells.iter().map(|(k, v)| leaf_cell_size(k, v)).sum::<usize>()
    }

    #[test]
    fn test_even_split_of_uniform_cells() {
        let cells: Vec<_> =
            (0..100u32).map(|i| (format!("key{i:04}").into_bytes(), vec![0u8; 30])).collect();
        let split = split_leaf_cells(cells, payload_capacity()).unwrap();

        assert!(!split.left.is_empty());
        assert!(!split.right.is_empty());
        assert_eq!(split.separator, split.right[0].0);
        assert!(split.left.last().unwrap().0 < split.right[0].0);
        assert!(leaf_bytes(&split.left) <= payload_capacity());
        assert!(leaf_bytes(&split.right) <= payload_capacity());
    }

    /// One near-page-size cell among many small ones: a midpoint split
    /// would leave the huge cell's side oversized, so the byte-aware
    /// fallback must slide the split point toward it. 80 cells of 43
    /// serialized bytes (3440) plus one 3910-byte cell total 7350, which
    /// two halves of 4054 can hold, but only with the split at index 77
    /// or later.
    #[test]
    fn test_split_with_one_huge_cell() {
        // 8 overhead + 5 key + 30 value = 43 bytes per small cell.
        let mut cells: Vec<_> =
            (0..80u32).map(|i| (format!("k{i:04}").into_bytes(), vec![0u8; 30])).collect();
        // 8 overhead + 5 key + 3897 value = 3910 bytes.
        cells.push((b"zzzzz".to_vec(), vec![1u8; 3897]));

        let split = split_leaf_cells(cells, payload_capacity()).unwrap();
        assert!(leaf_bytes(&split.left) <= payload_capacity());
        assert!(leaf_bytes(&split.right) <= payload_capacity());
        assert!(!split.left.is_empty());
        assert!(!split.right.is_empty());
    }

    #[test]
    fn test_huge_cell_on_the_left() {
        let mut cells = vec![(b"aaaaa".to_vec(), vec![1u8; 3897])];
        for i in 0..80u32 {
            cells.push((format!("m{i:04}").into_bytes(), vec![0u8; 30]));
        }

        let split = split_leaf_cells(cells, payload_capacity()).unwrap();
        assert!(leaf_bytes(&split.left) <= payload_capacity());
        assert!(leaf_bytes(&split.right) <= payload_capacity());
        assert!(!split.left.is_empty());
        assert!(!split.right.is_empty());
    }

    #[test]
    fn test_unsplittable_cells_rejected() {
        // Two cells that each exceed the capacity can never split into
        // fitting halves.
        let cells = vec![
            (b"a".to_vec(), vec![0u8; PAGE_SIZE]),
            (b"b".to_vec(), vec![0u8; PAGE_SIZE]),
        ];
        assert!(matches!(
            split_leaf_cells(cells, payload_capacity()),
            Err(Error::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_branch_split_promotes_separator() {
        let keys: Vec<_> = (0..9u8).map(|i| vec![i * 10]).collect();
        let children: Vec<PageId> = (0..10).collect();

        let split = split_branch_cells(keys.clone(), children, payload_capacity()).unwrap();

        assert_eq!(split.left_children.len(), split.left_keys.len() + 1);
        assert_eq!(split.right_children.len(), split.right_keys.len() + 1);
        // The separator came out of the key list entirely.
        assert!(!split.left_keys.contains(&split.separator));
        assert!(!split.right_keys.contains(&split.separator));
        assert_eq!(
            split.left_keys.len() + split.right_keys.len() + 1,
            keys.len(),
        );
        // Ordering preserved across the promotion.
        if let (Some(last_left), Some(first_right)) =
            (split.left_keys.last(), split.right_keys.first())
        {
            assert!(last_left < &split.separator);
            assert!(&split.separator < first_right);
        }
    }

    /// Small separators mixed with near-key-bound ones: 200 cells of 20
    /// bytes (4000) plus 4 of 916 (3664) total 7664, which fits two
    /// halves of 4054 only with the promotion pushed well past the cell
    /// midpoint. Larger separator mixes overflow into a third node and
    /// are exercised through the tree, where splits happen one at a time.
    #[test]
    fn test_branch_split_with_large_separators() {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for i in 0..200u32 {
            keys.push(format!("sep{i:05}").into_bytes());
        }
        for i in 0..4u32 {
            let mut k = format!("zz{i:02}").into_bytes();
            k.extend(vec![b'x'; 900]);
            keys.push(k);
        }
        keys.sort();
        let children: Vec<PageId> = (0..keys.len() as u64 + 1).collect();

        let capacity = payload_capacity() - BRANCH_HEADER_SIZE;
        let split = split_branch_cells(keys, children, payload_capacity()).unwrap();

        let left_size: usize = split.left_keys.iter().map(|k| branch_cell_size(k)).sum();
        let right_size: usize = split.right_keys.iter().map(|k| branch_cell_size(k)).sum();
        assert!(left_size <= capacity);
        assert!(right_size <= capacity);
    }
}
