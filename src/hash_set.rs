//! A typed set over the raw table.
//!
//! `HashSet<T, S>` pairs a [`RawTable`] with a [`FlatPolicy`]: elements are
//! self-contained values stored inline, hashed and compared whole.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::policy::FlatPolicy;
use crate::policy::FxBuildHasher;
use crate::table::RawTable;

/// A hash set backed by the group-probed raw table.
///
/// Elements must implement `Hash + Eq`; the hasher builder `S` defaults to
/// the crate's Fx-style hasher.
///
/// # Examples
///
/// ```rust
/// use swiss_table::HashSet;
///
/// let mut set = HashSet::new();
/// assert!(set.insert(3));
/// assert!(!set.insert(3));
/// assert!(set.contains(&3));
/// assert_eq!(set.len(), 1);
/// ```
pub struct HashSet<T, S = FxBuildHasher>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    table: RawTable<FlatPolicy<T, S>>,
}

impl<T, S> HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Creates an empty set with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use swiss_table::HashSet;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let set: HashSet<i32, _> = HashSet::with_hasher(SimpleHasher);
    /// assert!(set.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty set with room for `capacity` elements and the
    /// given hasher builder. The granted capacity may exceed the request.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        HashSet {
            table: RawTable::with_capacity(FlatPolicy::new(hash_builder), capacity),
        }
    }

    /// Number of elements in the set.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Total buckets in the backing table.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes every element, keeping moderate allocations for reuse.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Reserves room for at least `additional` further elements.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(self.table.len() + additional);
    }

    /// Shrinks the backing table to fit the current number of elements,
    /// deallocating entirely when the set is empty.
    pub fn shrink_to_fit(&mut self) {
        self.table.rehash(0);
    }

    /// Adds `value` to the set. Returns whether it was newly inserted; an
    /// already-present equal element is kept and the new value dropped.
    pub fn insert(&mut self, value: T) -> bool {
        self.table.insert(value).1
    }

    /// Whether the set contains an element equal to `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.table.contains(value)
    }

    /// Returns a reference to the stored element equal to `value`, if any.
    pub fn get(&self, value: &T) -> Option<&T> {
        let it = self.table.find(value);
        if it.is_end() {
            return None;
        }
        // SAFETY: the cursor is full and the table is borrowed for `'_`.
        Some(unsafe { &*it.get() })
    }

    /// Removes the element equal to `value`. Returns whether it was
    /// present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::HashSet;
    ///
    /// let mut set = HashSet::new();
    /// set.insert('x');
    /// assert!(set.remove(&'x'));
    /// assert!(!set.remove(&'x'));
    /// ```
    pub fn remove(&mut self, value: &T) -> bool {
        self.table.erase(value)
    }

    /// Removes and returns the stored element equal to `value`.
    pub fn take(&mut self, value: &T) -> Option<T> {
        let it = self.table.find(value);
        if it.is_end() {
            return None;
        }
        // SAFETY: the cursor came from a lookup on this table with no
        // intervening mutation.
        Some(unsafe { self.table.take_at(it) })
    }

    /// Iterates over the elements in unspecified order.
    pub fn iter(&self) -> Iter<'_, T, S> {
        Iter {
            inner: self.table.iter(),
        }
    }
}

impl<T> HashSet<T, FxBuildHasher>
where
    T: Hash + Eq,
{
    /// Creates an empty set with the default hasher builder.
    pub fn new() -> Self {
        Self::with_hasher(FxBuildHasher)
    }

    /// Creates an empty set with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, FxBuildHasher)
    }
}

impl<T, S> Default for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S> Debug for HashSet<T, S>
where
    T: Debug + Hash + Eq,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> Clone for HashSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        HashSet {
            table: self.table.duplicate(),
        }
    }
}

impl<T, S> Extend<T> for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T, S> FromIterator<T> for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::with_hasher(S::default());
        set.extend(iter);
        set
    }
}

impl<'a, T, S> IntoIterator for &'a HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T, S>;

    fn into_iter(self) -> Iter<'a, T, S> {
        self.iter()
    }
}

/// Borrowing iterator over a set's elements.
pub struct Iter<'a, T, S = FxBuildHasher>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    inner: crate::table::Iter<'a, FlatPolicy<T, S>>,
}

impl<'a, T, S> Iterator for Iter<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.inner.next()
    }
}
