//! Capacity arithmetic and whole-array control-byte operations.
//!
//! Valid capacities are powers of two minus one so that `hash & capacity`
//! selects a slot. The control array is one byte per slot, plus the sentinel
//! at index `capacity`, plus `Group::WIDTH - 1` cloned bytes that mirror the
//! first slots so a group load starting anywhere in `[0, capacity]` sees a
//! coherent window.

use core::alloc::Layout;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::control::Ctrl;
use crate::control::EMPTY;
use crate::control::SENTINEL;
use crate::group::Group;

/// Number of control bytes cloned from the front of the array to its tail.
pub(crate) const NUM_CLONED_BYTES: usize = Group::WIDTH - 1;

#[inline(always)]
pub(crate) fn is_valid_capacity(n: usize) -> bool {
    n.wrapping_add(1) & n == 0 && n > 0
}

/// Rounds up to the next power of two minus one, with a minimum of 1.
#[inline(always)]
pub(crate) fn normalize_capacity(n: usize) -> usize {
    if n == 0 {
        1
    } else {
        usize::MAX >> n.leading_zeros()
    }
}

/// The number of full slots at which a table of `capacity` must grow.
///
/// The load factor is 7/8 once a table spans more than one group; a table
/// that fits in a single group never probes, so it may fill completely.
#[inline(always)]
pub(crate) fn capacity_to_growth(capacity: usize) -> usize {
    debug_assert!(is_valid_capacity(capacity), "invalid capacity: {capacity}");
    if Group::WIDTH == 8 && capacity == 7 {
        // x - x/8 does not work when x == 7.
        return 6;
    }
    capacity - capacity / 8
}

/// From a desired growth to a lower bound on the capacity providing it.
/// The result is not necessarily valid and needs `normalize_capacity`.
#[inline(always)]
pub(crate) fn growth_to_lowerbound_capacity(growth: usize) -> usize {
    if Group::WIDTH == 8 && growth == 7 {
        // x + (x - 1)/7 does not work when x == 7.
        return 8;
    }
    growth + ((growth as i64 - 1) / 7) as usize
}

/// Layout of the single allocation backing a table: the control array
/// followed by the slot array, padded to the slot alignment.
#[derive(Clone, Copy)]
pub(crate) struct DataLayout {
    pub(crate) layout: Layout,
    pub(crate) slots_offset: usize,
}

impl DataLayout {
    pub(crate) fn new<Slot>(capacity: usize) -> DataLayout {
        debug_assert!(is_valid_capacity(capacity), "invalid capacity: {capacity}");
        let ctrl_layout = Layout::array::<Ctrl>(capacity + 1 + NUM_CLONED_BYTES)
            .expect("allocation size overflow");
        let slots_layout = Layout::array::<Slot>(capacity).expect("allocation size overflow");

        let (layout, slots_offset) = ctrl_layout
            .extend(slots_layout)
            .expect("allocation size overflow");

        DataLayout {
            layout,
            slots_offset,
        }
    }
}

/// Resets every control byte to `EMPTY` and restores the sentinel.
///
/// # Safety
///
/// `ctrl` must point at a control array of (valid) `capacity`.
#[inline]
pub(crate) unsafe fn reset_ctrl(capacity: usize, ctrl: *mut Ctrl) {
    // SAFETY: the control array is `capacity + 1 + NUM_CLONED_BYTES` long.
    unsafe {
        core::ptr::write_bytes(ctrl, EMPTY as u8, capacity + 1 + NUM_CLONED_BYTES);
        *ctrl.add(capacity) = SENTINEL;
    }
}

/// Sets `ctrl[i]`, mirroring into the cloned tail when `i` falls within the
/// first `NUM_CLONED_BYTES` slots. For single-group tables the two formulas
/// collapse onto the same byte.
///
/// # Safety
///
/// `ctrl` must point at a control array of (valid) `capacity`, `i < capacity`.
#[inline(always)]
pub(crate) unsafe fn set_ctrl(i: usize, h: Ctrl, capacity: usize, ctrl: *mut Ctrl) {
    debug_assert!(i < capacity, "set_ctrl out of bounds: {i} >= {capacity}");
    // SAFETY: both indices are within the control array; the mirror index
    // is `i` itself whenever `i` has no clone.
    unsafe {
        *ctrl.add(i) = h;
        *ctrl.add((i.wrapping_sub(NUM_CLONED_BYTES) & capacity) + (NUM_CLONED_BYTES & capacity)) =
            h;
    }
}

/// Applies `DELETED -> EMPTY`, `EMPTY -> EMPTY`, `FULL -> DELETED` across the
/// whole control array, then rebuilds the sentinel and cloned tail. This is
/// the first phase of squashing tombstones in place.
///
/// # Safety
///
/// `ctrl` must point at a control array of (valid) `capacity` whose sentinel
/// is in place.
pub(crate) unsafe fn convert_deleted_to_empty_and_full_to_deleted(ctrl: *mut Ctrl, capacity: usize) {
    // SAFETY: group strides stay within the array (its tail extends
    // `NUM_CLONED_BYTES` past the sentinel), and the sentinel/clone bytes
    // clobbered by the last stride are rebuilt below.
    unsafe {
        debug_assert!(
            *ctrl.add(capacity) == SENTINEL,
            "bad ctrl byte at {}: {:02x}",
            capacity,
            *ctrl.add(capacity) as u8
        );
        debug_assert!(is_valid_capacity(capacity), "invalid capacity: {capacity}");

        let mut pos = 0;
        while pos < capacity {
            let g = Group::load(ctrl.add(pos));
            g.convert_special_to_empty_and_full_to_deleted(ctrl.add(pos));
            pos += Group::WIDTH;
        }
        core::ptr::copy_nonoverlapping(ctrl, ctrl.add(capacity + 1), NUM_CLONED_BYTES);
        *ctrl.add(capacity) = SENTINEL;
    }
}

/// A per-process counter mixed with its own address. Updated with relaxed
/// atomics; never suitable as a security source.
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn random_seed() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let value = COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    value ^ (&COUNTER as *const AtomicUsize as usize)
}

/// Whether an insertion should land on the highest rather than lowest
/// matching lane of its group. Exercised only in debug builds, where it adds
/// insert-position entropy on hosts without ASLR.
#[cfg_attr(not(debug_assertions), allow(dead_code))]
#[inline(never)]
pub(crate) fn should_insert_backwards(hash: u64, ctrl: *const Ctrl) -> bool {
    // % 13 rather than a single-bit test, to stay fair under weak hashes.
    (crate::control::h1(hash, ctrl) ^ random_seed()) % 13 > 6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::DELETED;

    #[test]
    fn capacity_validity() {
        assert!(!is_valid_capacity(0));
        for n in [1usize, 3, 7, 15, 31, 63, 127, 255, 1023] {
            assert!(is_valid_capacity(n), "{n}");
        }
        for n in [2usize, 4, 8, 12, 16, 100] {
            assert!(!is_valid_capacity(n), "{n}");
        }
    }

    #[test]
    fn normalization_rounds_up() {
        assert_eq!(normalize_capacity(0), 1);
        assert_eq!(normalize_capacity(1), 1);
        assert_eq!(normalize_capacity(2), 3);
        assert_eq!(normalize_capacity(7), 7);
        assert_eq!(normalize_capacity(8), 15);
        assert_eq!(normalize_capacity(1000), 1023);
        for n in 1..2000usize {
            let c = normalize_capacity(n);
            assert!(is_valid_capacity(c) && c >= n);
        }
    }

    #[test]
    fn growth_is_seven_eighths() {
        for capacity in [15usize, 31, 63, 127, 1023] {
            assert_eq!(capacity_to_growth(capacity), capacity - capacity / 8);
        }
        if Group::WIDTH == 8 {
            assert_eq!(capacity_to_growth(7), 6);
            assert_eq!(growth_to_lowerbound_capacity(7), 8);
        } else {
            // Single-group tables fill completely.
            assert_eq!(capacity_to_growth(7), 7);
        }
    }

    #[test]
    fn growth_round_trips_through_capacity() {
        for growth in 1..500usize {
            let capacity = normalize_capacity(growth_to_lowerbound_capacity(growth));
            assert!(
                capacity_to_growth(capacity) >= growth,
                "growth {growth} -> capacity {capacity}"
            );
        }
    }

    #[test]
    fn layout_places_slots_past_the_ctrl_array() {
        let layout = DataLayout::new::<u64>(15);
        assert!(layout.slots_offset >= 15 + 1 + NUM_CLONED_BYTES);
        assert_eq!(layout.slots_offset % core::mem::align_of::<u64>(), 0);
        assert!(layout.layout.size() >= layout.slots_offset + 15 * 8);
    }

    #[test]
    fn reset_and_mirror() {
        let capacity = 31usize;
        let mut ctrl = alloc::vec![0i8; capacity + 1 + NUM_CLONED_BYTES];
        // SAFETY: the buffer has exactly the control-array length.
        unsafe {
            reset_ctrl(capacity, ctrl.as_mut_ptr());
            assert_eq!(ctrl[capacity], SENTINEL);
            for (i, c) in ctrl.iter().enumerate() {
                if i != capacity {
                    assert_eq!(*c, EMPTY, "index {i}");
                }
            }

            // A write inside the cloned prefix mirrors into the tail.
            set_ctrl(2, 0x51, capacity, ctrl.as_mut_ptr());
            assert_eq!(ctrl[2], 0x51);
            assert_eq!(ctrl[capacity + 1 + 2], 0x51);

            // A write past the prefix only lands once.
            set_ctrl(capacity - 1, 0x22, capacity, ctrl.as_mut_ptr());
            assert_eq!(ctrl.iter().filter(|c| **c == 0x22).count(), 1);
        }
    }

    #[test]
    fn convert_squashes_tombstones() {
        let capacity = 31usize;
        let mut ctrl = alloc::vec![0i8; capacity + 1 + NUM_CLONED_BYTES];
        // SAFETY: the buffer has exactly the control-array length.
        unsafe {
            reset_ctrl(capacity, ctrl.as_mut_ptr());
            set_ctrl(0, 0x11, capacity, ctrl.as_mut_ptr());
            set_ctrl(5, DELETED, capacity, ctrl.as_mut_ptr());
            set_ctrl(17, 0x7F, capacity, ctrl.as_mut_ptr());

            convert_deleted_to_empty_and_full_to_deleted(ctrl.as_mut_ptr(), capacity);
        }

        assert_eq!(ctrl[0], DELETED);
        assert_eq!(ctrl[5], EMPTY);
        assert_eq!(ctrl[17], DELETED);
        assert_eq!(ctrl[capacity], SENTINEL);
        for i in 0..NUM_CLONED_BYTES {
            assert_eq!(ctrl[capacity + 1 + i], ctrl[i], "clone byte {i}");
        }
        for i in 0..capacity {
            assert!(ctrl[i] == EMPTY || ctrl[i] == DELETED, "index {i}");
        }
    }

    #[test]
    fn jitter_is_roughly_balanced() {
        let ctrl = [0i8; 16];
        let mut backwards = 0;
        for hash in 0..1000u64 {
            if should_insert_backwards(hash.wrapping_mul(0x9E37_79B9_7F4A_7C15), ctrl.as_ptr()) {
                backwards += 1;
            }
        }
        // 6/13 of draws land backwards; leave generous slack.
        assert!(backwards > 200 && backwards < 800, "{backwards}");
    }
}
