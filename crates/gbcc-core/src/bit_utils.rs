//! Small bit-twiddling helpers shared by every component.

#[inline]
pub const fn bit(b: u8) -> u8 {
    1 << b
}

#[inline]
pub const fn bit16(b: u8) -> u16 {
    1 << b
}

#[inline]
pub const fn check_bit(val: u8, b: u8) -> bool {
    val & bit(b) != 0
}

#[inline]
pub const fn check_bit16(val: u16, b: u8) -> bool {
    val & bit16(b) != 0
}

#[inline]
pub const fn set_bit(val: u8, b: u8) -> u8 {
    val | bit(b)
}

#[inline]
pub const fn clear_bit(val: u8, b: u8) -> u8 {
    val & !bit(b)
}

/// Set or clear bit `b` of `val` depending on `cond`.
#[inline]
pub const fn cond_bit(val: u8, b: u8, cond: bool) -> u8 {
    if cond { set_bit(val, b) } else { clear_bit(val, b) }
}

#[inline]
pub const fn low_byte(val: u16) -> u8 {
    (val & 0x00FF) as u8
}

#[inline]
pub const fn high_byte(val: u16) -> u8 {
    (val >> 8) as u8
}

/// Join two bytes into a little-endian word.
#[inline]
pub const fn cat_bytes(lo: u8, hi: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_are_inverse() {
        for b in 0..8 {
            let v = set_bit(0, b);
            assert!(check_bit(v, b));
            assert_eq!(clear_bit(v, b), 0);
        }
    }

    #[test]
    fn cond_bit_selects_operation() {
        assert_eq!(cond_bit(0x00, 3, true), 0x08);
        assert_eq!(cond_bit(0xFF, 3, false), 0xF7);
    }

    #[test]
    fn byte_helpers() {
        assert_eq!(cat_bytes(0x34, 0x12), 0x1234);
        assert_eq!(low_byte(0x1234), 0x34);
        assert_eq!(high_byte(0x1234), 0x12);
        assert!(check_bit16(0x1000, 12));
    }
}
