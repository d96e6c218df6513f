//! Page arithmetic and sizing constants for the sandbox linear memory
//! model (§4.D "Numeric semantics", §6 "Sandbox memory layout").

/// Sandbox page size. Distinct from the host's native page size used by
/// `faas-state`'s raw mappings — this one is the wasm-style linear-memory
/// page the spec fixes at 64 KiB regardless of host.
pub const PAGE_SIZE: usize = 65_536;

/// Initial reservation: 30 pages worth of 1 MiB, i.e. 30 MiB.
pub const INITIAL_MEMORY_BYTES: usize = 30 * 1024 * 1024;

/// Hard ceiling on a single sandbox's linear memory.
pub const MAX_MEMORY_BYTES: usize = 1024 * 1024 * 1024;

/// Size of each guard region flanking a thread stack.
pub const GUARD_REGION_SIZE: usize = PAGE_SIZE;

/// Default thread stack size; configurable per [`crate::memory::Sandbox::with_stack_size`].
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Per-function shared-state mapping table ceiling (§6).
pub const MAX_STATE_MAPPINGS: usize = 500_000;

pub fn pages_for_bytes(n_bytes: usize) -> usize {
    n_bytes.div_ceil(PAGE_SIZE)
}

pub fn round_up_to_page(n_bytes: usize) -> usize {
    pages_for_bytes(n_bytes) * PAGE_SIZE
}

pub fn is_page_aligned(n: usize) -> bool {
    n & (PAGE_SIZE - 1) == 0
}

/// The page-aligned outer chunk covering `[offset, offset + length)`:
/// `(aligned_start, aligned_length, remainder)` where `remainder` is how
/// far `offset` sits into the first page of the chunk.
pub fn aligned_chunk(offset: usize, length: usize) -> (usize, usize, usize) {
    let aligned_start = (offset / PAGE_SIZE) * PAGE_SIZE;
    let remainder = offset - aligned_start;
    let aligned_end = round_up_to_page(offset + length);
    (aligned_start, aligned_end - aligned_start, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_for_bytes_rounds_up() {
        assert_eq!(pages_for_bytes(1), 1);
        assert_eq!(pages_for_bytes(PAGE_SIZE), 1);
        assert_eq!(pages_for_bytes(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn round_up_rounds_to_whole_pages() {
        assert_eq!(round_up_to_page(0), 0);
        assert_eq!(round_up_to_page(1), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE), PAGE_SIZE);
    }

    #[test]
    fn is_page_aligned_checks_low_bits() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(PAGE_SIZE));
        assert!(!is_page_aligned(PAGE_SIZE + 1));
    }

    #[test]
    fn aligned_chunk_covers_offset_and_length() {
        let (start, len, remainder) = aligned_chunk(PAGE_SIZE + 10, 100);
        assert_eq!(start, PAGE_SIZE);
        assert_eq!(remainder, 10);
        assert!(start + len >= PAGE_SIZE + 10 + 100);
        assert!(is_page_aligned(start));
        assert!(is_page_aligned(len));
    }

    #[test]
    fn aligned_chunk_on_already_aligned_offset_has_zero_remainder() {
        let (start, _len, remainder) = aligned_chunk(PAGE_SIZE, PAGE_SIZE);
        assert_eq!(start, PAGE_SIZE);
        assert_eq!(remainder, 0);
    }
}
