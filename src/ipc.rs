//! Instructions-per-cycle buckets.
//!
//! IPC is kept as four bits per event. The quotient is IPC in eighths, and
//! it is mapped through a coarse log-like table:
//! 0, 1/8, 1/4, 3/8, 1/2, 5/8, 3/4, 7/8, 1, 5/4, 3/2, 7/4, 2, 5/2, 3, 7/2.

const IPC_MAPPING: [u8; 64] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 8, 9, 9, 10, 10, 11, 11, //
    12, 12, 12, 12, 13, 13, 13, 13, 14, 14, 14, 14, 15, 15, 15, 15, //
    15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, //
    15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15,
];

/// Map an instruction/cycle delta pair to a 4-bit IPC bucket.
///
/// `delta_cycles` counts in units of 64 cycles. Intervals of one unit or
/// less return 0. The divide is 32-bit; IPC of 8 or more wraps.
#[inline]
pub fn granular(delta_inst: u64, delta_cycles: u64) -> u8 {
    if delta_cycles & !1 == 0 {
        return 0;
    }
    let del_inst = delta_inst as u32;
    let del_cycles = (delta_cycles << 3) as u32;
    if del_cycles == 0 {
        return 0;
    }
    IPC_MAPPING[((del_inst / del_cycles) & 0x3f) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_interval_is_zero() {
        assert_eq!(granular(1_000_000, 0), 0);
        assert_eq!(granular(1_000_000, 1), 0);
    }

    #[test]
    fn test_one_ipc() {
        // 6400 instructions over 100 units of 64 cycles
        assert_eq!(granular(6400, 100), 8);
    }

    #[test]
    fn test_table_shape() {
        assert_eq!(granular(100, 100), 0);
        assert_eq!(granular(800, 100), 1);
        assert_eq!(granular(7 * 800, 100), 7);
        assert_eq!(granular(10 * 800, 100), 9);
        assert_eq!(granular(31 * 800, 100), 15);
        assert_eq!(granular(63 * 800, 100), 15);
    }

    #[test]
    fn test_truncated_cycles_guard() {
        // low 32 bits of cycles << 3 are zero
        assert_eq!(granular(100, 1 << 29), 0);
    }
}
