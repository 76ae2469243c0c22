pub mod constants;
pub mod utils;
pub mod virtual_memory;

/// rounds the given value `addr` up to the nearest multiple
/// of `align`. `align` must be a power of two.
#[inline(always)]
pub const fn align_up(addr: usize, align: usize) -> usize {
    addr.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & align.wrapping_sub(1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert!(is_aligned(4096, 4096));
        assert!(!is_aligned(4100, 4096));
    }
}
