//! Wraparound-safe ordering for 32-bit sequence and serial numbers.
//!
//! Sequence numbers advance modulo 2^32, so ordering is decided by the sign
//! of the wrapped difference. Two numbers more than 2^31 apart compare the
//! "wrong" way; windows are bounded far below that.

/// Per-call DATA packet sequence number.
pub type Seq = u32;

/// Per-connection packet serial number.
pub type Serial = u32;

#[inline]
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn before_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn after_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_basic() {
        assert!(before(1, 2));
        assert!(before_eq(1, 2));
        assert!(before_eq(2, 2));
        assert!(after(3, 2));
        assert!(after_eq(3, 2));
        assert!(after_eq(2, 2));

        assert!(!before(2, 2));
        assert!(!after(2, 2));
    }

    #[test]
    fn ordering_wraparound() {
        // Near the wrap point, u32::MAX is just before 0
        assert!(before(u32::MAX, 0));
        assert!(before(u32::MAX - 1, 1));
        assert!(after(0, u32::MAX));
        assert!(after(5, u32::MAX - 5));

        assert!(before_eq(u32::MAX, 0));
        assert!(after_eq(0, u32::MAX));
    }

    #[test]
    fn exactly_one_relation_holds() {
        let ref values = [
            0u32,
            1,
            2,
            0x7FFF_FFFF,
            0x8000_0000,
            0x8000_0001,
            u32::MAX - 1,
            u32::MAX,
        ];

        for &a in values {
            for &b in values {
                // before(a,b) == after(b,a)
                assert_eq!(before(a, b), after(b, a));
                assert_eq!(before_eq(a, b), after_eq(b, a));

                // Exactly one of before / equal / after, except at the
                // antipode where the signed difference saturates
                if a.wrapping_sub(b) != 0x8000_0000 {
                    let relations =
                        [before(a, b), a == b, after(a, b)].iter().filter(|&&r| r).count();
                    assert_eq!(relations, 1, "a={:#x} b={:#x}", a, b);
                }
            }
        }
    }

    #[test]
    fn window_deltas_span_wrap() {
        // A window beginning just below the wrap point still orders its
        // members correctly
        let base: u32 = u32::MAX - 3;

        for i in 0..8u32 {
            let seq = base.wrapping_add(i);
            assert!(after_eq(seq, base));
            assert!(before(base.wrapping_sub(1), seq));
        }
    }
}
