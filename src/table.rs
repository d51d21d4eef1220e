//! The table engine: a policy-driven, open-addressed hash table probed a
//! group of control bytes at a time.
//!
//! ## Design
//!
//! The table is a single allocation holding a control array followed by a
//! slot array. Each slot has one control byte; a full byte stores the low
//! 7 bits of its element's hash, so a lookup compares a whole group of
//! candidate slots against the sought hash with one data-parallel match
//! before ever touching a slot. Probing walks groups in a triangular-number
//! stride, which visits every group exactly once per cycle for the
//! power-of-two-minus-one capacities the table uses.
//!
//! The control array carries two extras. The byte at index `capacity` is a
//! sentinel that terminates iteration, and the `Group::WIDTH - 1` bytes
//! after it mirror the first slots so a group load starting near the end of
//! the array sees the same bytes a wrapped probe would. Tables that have
//! never allocated share one static all-empty group whose sentinel sits in
//! position 0; lookups on them run the ordinary hot path and stop on the
//! first load, and every mutating path checks `capacity != 0` before
//! writing.
//!
//! Erasure does not move elements. A slot whose removal could break a probe
//! chain is tombstoned (`DELETED`) so later lookups keep walking past it;
//! a slot whose enclosing windows still contain empties on both sides goes
//! straight back to `EMPTY`. Tombstones are reclaimed wholesale: when an
//! insert finds the growth credit exhausted, the table either rewrites
//! itself in place (load at most 25/32) or doubles, rehashing every element
//! either way.
//!
//! ## Safety invariants
//!
//! The implementation relies on the following relationships:
//!
//! 1. `capacity == 0` or `capacity + 1` is a power of two, and the control
//!    array is `capacity + 1 + (Group::WIDTH - 1)` bytes long, so a group
//!    load at any index in `[0, capacity]` stays in bounds.
//! 2. A slot holds an initialized `P::Slot` exactly when its control byte
//!    is full; the control byte is the authoritative ownership marker.
//! 3. The cloned tail equals the corresponding prefix byte-for-byte, which
//!    `set_ctrl` maintains on every write.
//! 4. `growth_left` equals `capacity_to_growth(capacity) - size - deleted`,
//!    so a positive credit guarantees a terminating empty byte for every
//!    probe.

use core::fmt;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::ptr::NonNull;

#[cfg(target_arch = "x86")]
#[allow(unused_imports)]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
#[allow(unused_imports)]
use core::arch::x86_64::*;

use crate::capacity::capacity_to_growth;
use crate::capacity::convert_deleted_to_empty_and_full_to_deleted;
use crate::capacity::growth_to_lowerbound_capacity;
use crate::capacity::is_valid_capacity;
use crate::capacity::normalize_capacity;
use crate::capacity::reset_ctrl;
use crate::capacity::set_ctrl;
use crate::capacity::DataLayout;
use crate::control::empty_group;
use crate::control::h2;
use crate::control::is_deleted;
use crate::control::is_empty;
use crate::control::is_empty_or_deleted;
use crate::control::is_full;
use crate::control::Ctrl;
use crate::control::DELETED;
use crate::control::EMPTY;
use crate::control::SENTINEL;
use crate::group::Group;
use crate::policy::ClonePolicy;
use crate::policy::Policy;
use crate::probe::find_first_non_full;
use crate::probe::probe;

/// Prefetches the line holding `ptr` into cache. Advisory only.
///
/// # Safety
///
/// The caller must ensure `ptr` points at memory that is safe to read.
/// While the prefetch itself does not fault, issuing it for an invalid
/// address is outside its contract.
#[inline(always)]
unsafe fn prefetch<T>(ptr: *const T) {
    #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse"))]
    // SAFETY: prefetching has no architectural memory effects.
    unsafe {
        _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8);
    }
    #[cfg(not(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse")))]
    let _ = ptr;
}

/// A low-level hash table storing `P::Element` values in `P::Slot` storage
/// units, with hashing, equality, storage, and allocation all supplied by
/// the [`Policy`].
///
/// The table is not a drop-in map: elements are self-contained values, the
/// policy decides which of their bits participate in hashing and equality,
/// and mutating operations invalidate cursors unless documented otherwise.
/// The [`crate::HashMap`] and [`crate::HashSet`] wrappers provide the
/// conventional typed surfaces.
pub struct RawTable<P: Policy> {
    ctrl: NonNull<Ctrl>,
    slots: NonNull<P::Slot>,
    /// Number of full slots.
    size: usize,
    /// Total slots; zero or a power of two minus one.
    capacity: usize,
    /// Remaining `EMPTY -> FULL` transitions before a rehash is forced.
    growth_left: usize,
    policy: P,
}

// SAFETY: the table uniquely owns its allocation, slots, and policy, so it
// may move between threads whenever those constituents may.
unsafe impl<P> Send for RawTable<P>
where
    P: Policy + Send,
    P::Slot: Send,
{
}

// SAFETY: shared access only reads table memory; the policy is shared too.
unsafe impl<P> Sync for RawTable<P>
where
    P: Policy + Sync,
    P::Slot: Sync,
{
}

impl<P: Policy> RawTable<P> {
    /// Creates an empty table with no allocation. The control pointer
    /// refers to the shared static empty group until the first growth.
    pub fn new(policy: P) -> Self {
        RawTable {
            // SAFETY: the static empty group is a non-null pointer.
            ctrl: unsafe { NonNull::new_unchecked(empty_group()) },
            slots: NonNull::dangling(),
            size: 0,
            capacity: 0,
            growth_left: 0,
            policy,
        }
    }

    /// Creates a table with room for `bucket_count` slots, rounded up to
    /// the next valid capacity. `bucket_count == 0` allocates nothing.
    pub fn with_capacity(policy: P, bucket_count: usize) -> Self {
        let mut table = Self::new(policy);
        if bucket_count > 0 {
            table.capacity = normalize_capacity(bucket_count);
            table.initialize_slots();
        }
        table
    }

    /// The policy this table operates through.
    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Number of elements in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the table holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Total slots in the backing array (not the growth threshold).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of slots that are full, in `[0, 1]`.
    pub fn load_factor(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f64 / self.capacity as f64
        }
    }

    /// Allocates and installs a zeroed-out backing array for the current
    /// `self.capacity`, resetting the growth credit.
    fn initialize_slots(&mut self) {
        debug_assert!(self.capacity != 0, "capacity should be nonzero");
        let layout = DataLayout::new::<P::Slot>(self.capacity);
        let mem = self.policy.alloc(layout.layout);
        self.ctrl = mem.cast();
        // SAFETY: the allocation extends `slots_offset` bytes of control
        // data followed by `capacity` slots.
        unsafe {
            self.slots =
                NonNull::new_unchecked(mem.as_ptr().add(layout.slots_offset) as *mut P::Slot);
            reset_ctrl(self.capacity, self.ctrl.as_ptr());
        }
        self.reset_growth_left();
    }

    /// Destroys all elements and releases the backing array, returning the
    /// table to the unallocated state.
    fn destroy_slots(&mut self) {
        if self.capacity == 0 {
            return;
        }

        // SAFETY: full control bytes mark initialized slots; the allocation
        // layout is a pure function of the capacity.
        unsafe {
            if !P::TRIVIAL_DEL {
                for i in 0..self.capacity {
                    if is_full(*self.ctrl.as_ptr().add(i)) {
                        self.policy.slot_del(self.slots.as_ptr().add(i));
                    }
                }
            }

            let layout = DataLayout::new::<P::Slot>(self.capacity);
            self.policy.dealloc(self.ctrl.cast(), layout.layout);
            self.ctrl = NonNull::new_unchecked(empty_group());
        }
        self.slots = NonNull::dangling();
        self.size = 0;
        self.capacity = 0;
        self.growth_left = 0;
    }

    #[inline]
    fn reset_growth_left(&mut self) {
        self.growth_left = capacity_to_growth(self.capacity) - self.size;
    }

    #[inline(always)]
    fn prefetch_heap_block(&self) {
        // SAFETY: the control pointer is always readable (it is the static
        // empty group when nothing is allocated).
        unsafe { prefetch(self.ctrl.as_ptr()) }
    }

    /// Looks up `key` by a pre-computed hash, which must agree with the
    /// policy's hash of `key`. Returns the end cursor if absent.
    pub fn find_hinted(&self, key: &P::Element, hash: u64) -> RawIter<P> {
        debug_assert!(
            hash == self.policy.hash(key),
            "lookup hash disagrees with the policy hash"
        );
        self.find_with(hash, |elem| self.policy.eq(elem, key))
    }

    /// Looks up `key`. Returns the end cursor if absent.
    pub fn find(&self, key: &P::Element) -> RawIter<P> {
        self.find_hinted(key, self.policy.hash(key))
    }

    /// Whether an element equal to `key` is present.
    pub fn contains(&self, key: &P::Element) -> bool {
        !self.find(key).is_end()
    }

    /// The probe walk shared by every lookup: group-match `H2`, refine with
    /// `eq`, stop at the first group containing an empty byte.
    pub(crate) fn find_with(
        &self,
        hash: u64,
        mut eq: impl FnMut(&P::Element) -> bool,
    ) -> RawIter<P> {
        let mut seq = probe(self.ctrl.as_ptr(), hash, self.capacity);
        loop {
            // SAFETY: probe offsets are masked by the capacity and the
            // control array extends a full group past any of them. A slot
            // is only touched after its control byte matched `H2`, which
            // full bytes alone can do.
            unsafe {
                let g = Group::load(self.ctrl.as_ptr().add(seq.base()));
                for i in g.match_h2(h2(hash)) {
                    let index = seq.offset(i as usize);
                    let slot = self.slots.as_ptr().add(index);
                    if eq(&*self.policy.slot_get(slot)) {
                        return self.iter_at(index);
                    }
                }
                if g.match_empty().any() {
                    return RawIter::end(self);
                }
            }
            seq.next();
            debug_assert!(seq.stride() <= self.capacity, "full table");
        }
    }

    /// Inserts `value`, unless an equal element is already present. Returns
    /// a cursor to the element that is in the table afterwards, plus
    /// whether it was newly inserted. When an equal element exists, `value`
    /// is dropped and the existing element is untouched.
    pub fn insert(&mut self, value: P::Element) -> (RawIter<P>, bool) {
        let hash = self.policy.hash(&value);
        let (index, inserted) = self.find_or_prepare_insert(hash, &value);
        // SAFETY: `find_or_prepare_insert` returns either the index of the
        // matching full slot or a freshly claimed slot awaiting its value.
        unsafe {
            if inserted {
                self.insert_at(index, value);
            }
            (self.iter_at(index), inserted)
        }
    }

    fn find_or_prepare_insert(&mut self, hash: u64, value: &P::Element) -> (usize, bool) {
        self.prefetch_heap_block();
        let mut seq = probe(self.ctrl.as_ptr(), hash, self.capacity);
        loop {
            // SAFETY: as in `find_with`.
            unsafe {
                let g = Group::load(self.ctrl.as_ptr().add(seq.base()));
                for i in g.match_h2(h2(hash)) {
                    let index = seq.offset(i as usize);
                    let slot = self.slots.as_ptr().add(index);
                    if self.policy.eq(&*self.policy.slot_get(slot), value) {
                        return (index, false);
                    }
                }
                if g.match_empty().any() {
                    break;
                }
            }
            seq.next();
            debug_assert!(seq.stride() <= self.capacity, "full table");
        }
        (self.prepare_insert(hash), true)
    }

    /// Claims a slot for an element hashing to `hash`: finds the first
    /// vacant slot on the probe walk, growing or squashing tombstones if
    /// the growth credit is spent, and writes the `H2` control byte.
    ///
    /// Reusing a tombstone does not consume growth credit; only an
    /// `EMPTY -> FULL` transition does.
    fn prepare_insert(&mut self, hash: u64) -> usize {
        // SAFETY: probe offsets stay within the control array; the target
        // index is below the capacity whenever it is written through.
        unsafe {
            let mut target = find_first_non_full(self.ctrl.as_ptr(), hash, self.capacity);
            if self.growth_left == 0 && !is_deleted(*self.ctrl.as_ptr().add(target.offset)) {
                self.rehash_and_grow_if_necessary();
                target = find_first_non_full(self.ctrl.as_ptr(), hash, self.capacity);
            }
            self.size += 1;
            self.growth_left -= is_empty(*self.ctrl.as_ptr().add(target.offset)) as usize;
            set_ctrl(target.offset, h2(hash), self.capacity, self.ctrl.as_ptr());
            target.offset
        }
    }

    /// Initializes the slot at `index` and moves `value` into it.
    ///
    /// # Safety
    ///
    /// `index` must have been returned by `prepare_insert` with no
    /// intervening mutation.
    unsafe fn insert_at(&mut self, index: usize, value: P::Element) {
        // SAFETY: the slot was claimed for exactly this write.
        unsafe {
            let slot = self.slots.as_ptr().add(index);
            self.policy.slot_init(slot);
            ptr::write(self.policy.slot_get(slot), value);
        }
    }

    /// Grows on a full table: fresh tables get capacity 1, tables at most
    /// 25/32 full squash their tombstones in place, everything else
    /// doubles. Squashing is preferred because erase-heavy workloads
    /// produce tombstones much faster than they produce net growth.
    fn rehash_and_grow_if_necessary(&mut self) {
        if self.capacity == 0 {
            self.resize(1);
        } else if self.capacity > Group::WIDTH
            && (self.size as u64) * 32 <= (self.capacity as u64) * 25
        {
            // SAFETY: capacity is valid and spans multiple groups.
            unsafe { self.drop_deletes_without_resize() };
        } else {
            self.resize(self.capacity * 2 + 1);
        }
    }

    /// Rebuilds the table in a fresh allocation of `new_capacity` slots,
    /// re-probing every element against the new control array.
    fn resize(&mut self, new_capacity: usize) {
        debug_assert!(
            is_valid_capacity(new_capacity),
            "invalid capacity: {new_capacity}"
        );
        let old_ctrl = self.ctrl;
        let old_slots = self.slots;
        let old_capacity = self.capacity;
        self.capacity = new_capacity;
        self.initialize_slots();

        // SAFETY: the old arrays remain intact until every full slot has
        // been transferred; the new table has `growth_left >= size` empty
        // slots, so every probe terminates.
        unsafe {
            for i in 0..old_capacity {
                if !is_full(*old_ctrl.as_ptr().add(i)) {
                    continue;
                }
                let old_slot = old_slots.as_ptr().add(i);
                let hash = self.policy.hash(&*self.policy.slot_get(old_slot));
                let target = find_first_non_full(self.ctrl.as_ptr(), hash, self.capacity);
                set_ctrl(target.offset, h2(hash), self.capacity, self.ctrl.as_ptr());
                self.policy
                    .slot_transfer(self.slots.as_ptr().add(target.offset), old_slot);
            }
            if old_capacity > 0 {
                let layout = DataLayout::new::<P::Slot>(old_capacity);
                self.policy.dealloc(old_ctrl.cast(), layout.layout);
            }
        }
    }

    /// Reclaims every tombstone without reallocating.
    ///
    /// First pass remaps the control array so tombstones and empties become
    /// `EMPTY` while full slots become `DELETED`, marking the latter as
    /// "to be re-placed". Each marked slot is then re-probed: an element
    /// already in its best group is simply re-marked full; one whose target
    /// is empty moves there; one whose target is still awaiting placement
    /// swaps with it through a scratch slot and the current index is
    /// re-processed.
    ///
    /// # Safety
    ///
    /// The capacity must be valid and larger than one group.
    unsafe fn drop_deletes_without_resize(&mut self) {
        debug_assert!(
            is_valid_capacity(self.capacity),
            "invalid capacity: {}",
            self.capacity
        );
        debug_assert!(
            !crate::probe::is_small(self.capacity),
            "unexpected small capacity: {}",
            self.capacity
        );

        // SAFETY: every index touched is below the capacity; slots are only
        // read through control bytes that mark them as holding an element
        // (DELETED during this pass marks a displaced full slot).
        unsafe {
            let ctrl = self.ctrl.as_ptr();
            convert_deleted_to_empty_and_full_to_deleted(ctrl, self.capacity);

            let mut scratch = mem::MaybeUninit::<P::Slot>::uninit();
            let mut i = 0;
            while i < self.capacity {
                if !is_deleted(*ctrl.add(i)) {
                    i += 1;
                    continue;
                }

                let old_slot = self.slots.as_ptr().add(i);
                let hash = self.policy.hash(&*self.policy.slot_get(old_slot));
                let target = find_first_non_full(ctrl, hash, self.capacity);
                let new_i = target.offset;

                // An element within its original probe group is already in
                // the best slot it can reach; it stays put.
                let probe_offset = probe(ctrl, hash, self.capacity).base();
                let probe_index =
                    |pos: usize| (pos.wrapping_sub(probe_offset) & self.capacity) / Group::WIDTH;
                if probe_index(new_i) == probe_index(i) {
                    set_ctrl(i, h2(hash), self.capacity, ctrl);
                    i += 1;
                    continue;
                }

                let new_slot = self.slots.as_ptr().add(new_i);
                if is_empty(*ctrl.add(new_i)) {
                    set_ctrl(new_i, h2(hash), self.capacity, ctrl);
                    self.policy.slot_transfer(new_slot, old_slot);
                    set_ctrl(i, EMPTY, self.capacity, ctrl);
                    i += 1;
                } else {
                    debug_assert!(
                        is_deleted(*ctrl.add(new_i)),
                        "bad ctrl byte at {}: {:02x}",
                        new_i,
                        *ctrl.add(new_i) as u8
                    );
                    set_ctrl(new_i, h2(hash), self.capacity, ctrl);
                    // Swap the two displaced elements and re-process `i`,
                    // which now holds the element evicted from `new_i`.
                    self.policy.slot_transfer(scratch.as_mut_ptr(), old_slot);
                    self.policy.slot_transfer(old_slot, new_slot);
                    self.policy.slot_transfer(new_slot, scratch.as_mut_ptr());
                }
            }
            self.reset_growth_left();
        }
    }

    /// Updates the metadata for an erase at `index` without touching the
    /// slot. The slot byte becomes `EMPTY` when no probe chain can have
    /// relied on it: that requires empties in both adjacent group windows,
    /// close enough together that every window covering `index` also
    /// covers an empty.
    ///
    /// # Safety
    ///
    /// `index` must be a full slot of this table.
    unsafe fn erase_meta_only(&mut self, index: usize) {
        // SAFETY: `index` is below the capacity, so both window loads stay
        // within the control array.
        unsafe {
            debug_assert!(
                is_full(*self.ctrl.as_ptr().add(index)),
                "erasing a dangling cursor"
            );
            self.size -= 1;
            let index_before = index.wrapping_sub(Group::WIDTH) & self.capacity;
            let empty_after = Group::load(self.ctrl.as_ptr().add(index)).match_empty();
            let empty_before = Group::load(self.ctrl.as_ptr().add(index_before)).match_empty();

            // Count the contiguous non-empties bracketing `index`; if they
            // span a whole group, some probe window saw no empty here.
            let was_never_full = empty_before.any()
                && empty_after.any()
                && (((empty_after.trailing_zeros() + empty_before.leading_zeros()) as usize)
                    < Group::WIDTH);

            set_ctrl(
                index,
                if was_never_full { EMPTY } else { DELETED },
                self.capacity,
                self.ctrl.as_ptr(),
            );
            self.growth_left += was_never_full as usize;
        }
    }

    /// Removes the element equal to `key`, if present. Tombstone-only: no
    /// cursor is invalidated.
    pub fn erase(&mut self, key: &P::Element) -> bool {
        let it = self.find(key);
        if it.is_end() {
            return false;
        }
        // SAFETY: `find` returned a full cursor into this table.
        unsafe { self.erase_at(it) };
        true
    }

    /// Removes the element under a cursor. Tombstone-only: the cursor (and
    /// any copy of it) remains valid for advancement afterwards.
    ///
    /// # Safety
    ///
    /// `it` must be a non-end cursor into this table whose element has not
    /// already been erased, with no rehash since it was obtained.
    pub unsafe fn erase_at(&mut self, it: RawIter<P>) {
        // SAFETY: a valid full cursor marks an initialized slot; the index
        // arithmetic inverts `iter_at`.
        unsafe {
            debug_assert!(
                !it.ctrl.is_null() && is_full(*it.ctrl),
                "erasing an invalid cursor"
            );
            let index = it.ctrl.offset_from(self.ctrl.as_ptr()) as usize;
            self.policy.slot_del(self.slots.as_ptr().add(index));
            self.erase_meta_only(index);
        }
    }

    /// Moves the element under a cursor out of the table. Same metadata
    /// effects as [`RawTable::erase_at`].
    ///
    /// # Safety
    ///
    /// As for [`RawTable::erase_at`].
    pub(crate) unsafe fn take_at(&mut self, it: RawIter<P>) -> P::Element {
        // SAFETY: as in `erase_at`; `slot_take` leaves the slot
        // uninitialized, matching the control byte transition.
        unsafe {
            debug_assert!(
                !it.ctrl.is_null() && is_full(*it.ctrl),
                "taking from an invalid cursor"
            );
            let index = it.ctrl.offset_from(self.ctrl.as_ptr()) as usize;
            let value = self.policy.slot_take(self.slots.as_ptr().add(index));
            self.erase_meta_only(index);
            value
        }
    }

    /// Destroys every element. Large backing arrays (capacity above 127)
    /// are released outright, because clearing them costs more than
    /// re-allocating later; smaller ones are retained and reset.
    pub fn clear(&mut self) {
        if self.capacity > 127 {
            self.destroy_slots();
        } else if self.capacity > 0 {
            // SAFETY: full bytes mark initialized slots.
            unsafe {
                if !P::TRIVIAL_DEL {
                    for i in 0..self.capacity {
                        if is_full(*self.ctrl.as_ptr().add(i)) {
                            self.policy.slot_del(self.slots.as_ptr().add(i));
                        }
                    }
                }
                self.size = 0;
                reset_ctrl(self.capacity, self.ctrl.as_ptr());
            }
            self.reset_growth_left();
        }
        debug_assert!(self.size == 0, "size was still nonzero");
    }

    /// Ensures the table can reach `n` elements without further growth.
    pub fn reserve(&mut self, n: usize) {
        if n > self.size + self.growth_left {
            let m = growth_to_lowerbound_capacity(n);
            self.resize(normalize_capacity(m));
        }
    }

    /// Resizes to at least `n` buckets. `n == 0` shrinks to fit: the table
    /// is deallocated when empty, and unconditionally rehashed otherwise.
    pub fn rehash(&mut self, n: usize) {
        if n == 0 && self.capacity == 0 {
            return;
        }
        if n == 0 && self.size == 0 {
            self.destroy_slots();
            return;
        }

        // bitor is a cheap max here: both operands round up to the next
        // power-of-two-minus-one together.
        let m = normalize_capacity(n | growth_to_lowerbound_capacity(self.size));
        if n == 0 || m > self.capacity {
            self.resize(m);
        }
    }

    /// Deep-copies the table with a fresh capacity tight to the current
    /// size. The source is known deduplicated, so elements are placed with
    /// a bare vacancy probe and no equality checks.
    pub fn duplicate(&self) -> Self
    where
        P: ClonePolicy + Clone,
    {
        let mut new = RawTable::new(self.policy.clone());
        new.reserve(self.size);

        // SAFETY: the fresh table reserved room for every element, so each
        // vacancy probe terminates on an empty slot; cloned elements are
        // written into just-initialized slots.
        unsafe {
            let mut it = self.raw_iter();
            let mut elem = it.get();
            while !elem.is_null() {
                let hash = new.policy.hash(&*elem);
                let target = find_first_non_full(new.ctrl.as_ptr(), hash, new.capacity);
                set_ctrl(target.offset, h2(hash), new.capacity, new.ctrl.as_ptr());
                let slot = new.slots.as_ptr().add(target.offset);
                new.policy.slot_init(slot);
                new.policy.clone_elem(new.policy.slot_get(slot), &*elem);
                elem = it.next();
            }
            new.size = self.size;
            new.growth_left -= self.size;
        }
        new
    }

    /// Borrowing iterator over the elements, in unspecified order.
    pub fn iter(&self) -> Iter<'_, P> {
        Iter {
            // SAFETY: index 0 is a valid cursor start for any table.
            raw: unsafe { self.iter_at(0) },
            _marker: PhantomData,
        }
    }

    /// A cursor positioned at the first element (or at the end when the
    /// table is empty). Advancing and dereferencing it are unsafe; see
    /// [`RawIter`]. This is the erase-during-iteration API.
    pub fn raw_iter(&self) -> RawIter<P> {
        // SAFETY: index 0 is a valid cursor start for any table.
        unsafe { self.iter_at(0) }
    }

    /// Builds a cursor at `index`, skipping forward to the next full slot
    /// (or to the end state at the sentinel).
    ///
    /// # Safety
    ///
    /// `index` must be at most the capacity.
    unsafe fn iter_at(&self, index: usize) -> RawIter<P> {
        // SAFETY: `index <= capacity` keeps both pointers inside their
        // arrays (or on the static group's sentinel); the slot pointer is
        // never dereferenced unless its control byte is full, and the
        // control array terminates with the sentinel.
        unsafe {
            let mut it = RawIter {
                table: NonNull::from(self),
                ctrl: self.ctrl.as_ptr().add(index),
                slot: self.slots.as_ptr().add(index),
            };
            it.skip_empty_or_deleted();
            debug_assert!(
                it.ctrl.is_null() || is_full(*it.ctrl),
                "cursor landed on a non-full byte"
            );
            it
        }
    }
}

impl<P: Policy> Drop for RawTable<P> {
    fn drop(&mut self) {
        self.destroy_slots();
    }
}

impl<P: ClonePolicy + Clone> Clone for RawTable<P> {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl<P: Policy> Debug for RawTable<P> {
    /// Dumps the table metadata: one header line with the control pointer,
    /// size, and capacity, then one line per control byte with its state
    /// and, for full slots, the raw slot bytes (and the element bytes when
    /// the slot indirects). The format is informational, not stable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:p} / {} / {}",
            self.ctrl.as_ptr(),
            self.size,
            self.capacity
        )?;
        if self.capacity == 0 {
            return Ok(());
        }

        for i in 0..=self.capacity {
            // SAFETY: `i <= capacity` is inside the control array; slot
            // bytes are only read for full slots, which are initialized.
            unsafe {
                let ctrl = self.ctrl.as_ptr().add(i);
                write!(f, "[{i:4}] {ctrl:p} / ")?;
                let c = *ctrl;
                if c == SENTINEL {
                    writeln!(f, "kSentinel: //")?;
                    continue;
                }
                if is_empty(c) {
                    write!(f, "   kEmpty")?;
                } else if is_deleted(c) {
                    write!(f, " kDeleted")?;
                } else {
                    write!(f, " H2(0x{c:02x})")?;
                }

                let slot = self.slots.as_ptr().add(i);
                write!(f, ": {slot:p} /")?;
                if is_full(c) {
                    for offset in 0..mem::size_of::<P::Slot>() {
                        write!(f, " {:02x}", *(slot as *const u8).add(offset))?;
                    }
                    let elem = self.policy.slot_get(slot);
                    if elem as *const u8 != slot as *const u8 {
                        write!(f, " ->")?;
                        for offset in 0..mem::size_of::<P::Element>() {
                            write!(f, " {:02x}", *(elem as *const u8).add(offset))?;
                        }
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// A cursor into a [`RawTable`]: a control/slot pointer pair, or the end
/// state after the last element.
///
/// Cursors are plain copies of raw pointers. Any rehash, resize, or growing
/// reserve invalidates every cursor; erasing through
/// [`RawTable::erase_at`] does not, so an erase-while-iterating loop may
/// keep advancing the same cursor it erased at.
pub struct RawIter<P: Policy> {
    table: NonNull<RawTable<P>>,
    /// Null in the end state.
    ctrl: *const Ctrl,
    slot: *mut P::Slot,
}

impl<P: Policy> Clone for RawIter<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Policy> Copy for RawIter<P> {}

impl<P: Policy> RawIter<P> {
    fn end(table: &RawTable<P>) -> RawIter<P> {
        RawIter {
            table: NonNull::from(table),
            ctrl: ptr::null(),
            slot: ptr::null_mut(),
        }
    }

    /// Whether the cursor is past the last element.
    #[inline]
    pub fn is_end(&self) -> bool {
        self.ctrl.is_null()
    }

    /// Advances over empty and deleted slots a group at a time; at the
    /// sentinel the cursor normalizes to the end state.
    ///
    /// # Safety
    ///
    /// The cursor must point into the control array of a live table.
    unsafe fn skip_empty_or_deleted(&mut self) {
        // SAFETY: the run of empty-or-deleted bytes always terminates
        // before the sentinel, and every group load along it is in bounds.
        unsafe {
            while is_empty_or_deleted(*self.ctrl) {
                let shift = Group::load(self.ctrl).count_leading_empty_or_deleted();
                self.ctrl = self.ctrl.add(shift);
                self.slot = self.slot.add(shift);
            }

            if *self.ctrl == SENTINEL {
                self.ctrl = ptr::null();
                self.slot = ptr::null_mut();
            }
        }
    }

    /// The element under the cursor, or null at the end.
    ///
    /// # Safety
    ///
    /// The table must be live and not rehashed since this cursor was
    /// obtained, and the element must not have been erased.
    pub unsafe fn get(&self) -> *mut P::Element {
        // SAFETY: a non-end cursor points at a full slot of a live table.
        unsafe {
            debug_assert!(
                self.ctrl.is_null() || is_full(*self.ctrl),
                "cursor dereferenced after erase or rehash ({:p})",
                self.ctrl,
            );
            if self.slot.is_null() {
                return ptr::null_mut();
            }
            (*self.table.as_ptr()).policy.slot_get(self.slot)
        }
    }

    /// Advances to the next full slot and returns its element, or null
    /// once the table is exhausted.
    ///
    /// # Safety
    ///
    /// The cursor must not be at the end, the table must be live and not
    /// rehashed since the cursor was obtained.
    pub unsafe fn next(&mut self) -> *mut P::Element {
        // SAFETY: a non-end cursor sits below the sentinel, so advancing
        // one lane stays inside the control array.
        unsafe {
            debug_assert!(!self.ctrl.is_null(), "advancing the end cursor");
            self.ctrl = self.ctrl.add(1);
            self.slot = self.slot.add(1);
            self.skip_empty_or_deleted();
            self.get()
        }
    }
}

/// Borrowing iterator over a table's elements. The borrow keeps the table
/// immutable for the iteration, so the underlying cursor stays valid
/// throughout.
pub struct Iter<'a, P: Policy> {
    raw: RawIter<P>,
    _marker: PhantomData<&'a RawTable<P>>,
}

impl<'a, P: Policy> Iterator for Iter<'a, P> {
    type Item = &'a P::Element;

    fn next(&mut self) -> Option<&'a P::Element> {
        // SAFETY: the `'a` borrow pins the table; the cursor only ever
        // rests on full slots or the end state.
        unsafe {
            let elem = self.raw.get();
            if elem.is_null() {
                return None;
            }
            self.raw.next();
            Some(&*elem)
        }
    }
}
