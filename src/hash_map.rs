//! A typed key-value map over the raw table.
//!
//! `HashMap<K, V, S>` pairs a [`RawTable`] with a [`MapPolicy`], which
//! hashes and compares entries by key only. The map owns its entries
//! inline; growth moves them, so references obtained through `get` do not
//! survive mutation.

use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;

use crate::policy::FxBuildHasher;
use crate::policy::MapPolicy;
use crate::table::RawTable;

/// A hash map backed by the group-probed raw table.
///
/// Keys must implement `Hash + Eq`; the hasher builder `S` defaults to the
/// crate's Fx-style hasher. Supply a keyed hasher (for example a random-key
/// SipHash) when the keys may be attacker-controlled.
///
/// # Examples
///
/// ```rust
/// use swiss_table::HashMap;
///
/// let mut map = HashMap::new();
/// map.insert("a", 1);
/// map.insert("b", 2);
/// assert_eq!(map.get(&"a"), Some(&1));
/// assert_eq!(map.len(), 2);
/// ```
pub struct HashMap<K, V, S = FxBuildHasher>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    table: RawTable<MapPolicy<K, V, S>>,
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates an empty map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use swiss_table::HashMap;
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
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty map with room for `capacity` entries and the given
    /// hasher builder. The granted capacity may exceed the request.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        HashMap {
            table: RawTable::with_capacity(MapPolicy::new(hash_builder), capacity),
        }
    }

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Total buckets in the backing table.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes every entry, keeping moderate allocations for reuse.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Reserves room for at least `additional` further entries.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(self.table.len() + additional);
    }

    /// Shrinks the backing table to fit the current number of entries,
    /// deallocating entirely when the map is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::HashMap;
    ///
    /// let mut map = HashMap::with_capacity(100);
    /// map.insert(1, "one");
    /// map.shrink_to_fit();
    /// assert!(map.capacity() < 100);
    /// assert_eq!(map.get(&1), Some(&"one"));
    /// ```
    pub fn shrink_to_fit(&mut self) {
        self.table.rehash(0);
    }

    /// Inserts a key-value pair, returning the previous value if the key
    /// was already present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::HashMap;
    ///
    /// let mut map = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.table.policy().hash_key(&key);
        let it = self.table.find_with(hash, |entry| entry.0 == key);
        if !it.is_end() {
            // SAFETY: the cursor came from a lookup on this table with no
            // intervening mutation, and points at a full entry.
            return Some(unsafe { mem::replace(&mut (*it.get()).1, value) });
        }
        self.table.insert((key, value));
        None
    }

    /// Returns a reference to the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.table.policy().hash_key(key);
        let it = self.table.find_with(hash, |entry| entry.0 == *key);
        if it.is_end() {
            return None;
        }
        // SAFETY: the cursor is full and the table is borrowed for `'_`.
        Some(unsafe { &(*it.get()).1 })
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.table.policy().hash_key(key);
        let it = self.table.find_with(hash, |entry| entry.0 == *key);
        if it.is_end() {
            return None;
        }
        // SAFETY: the cursor is full and the table is borrowed mutably.
        Some(unsafe { &mut (*it.get()).1 })
    }

    /// Whether the map contains `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key` from the map, returning its value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::HashMap;
    ///
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.table.policy().hash_key(key);
        let it = self.table.find_with(hash, |entry| entry.0 == *key);
        if it.is_end() {
            return None;
        }
        // SAFETY: the cursor came from a lookup on this table with no
        // intervening mutation.
        let (_, value) = unsafe { self.table.take_at(it) };
        Some(value)
    }

    /// Iterates over `(&K, &V)` pairs in unspecified order.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            inner: self.table.iter(),
        }
    }
}

impl<K, V> HashMap<K, V, FxBuildHasher>
where
    K: Hash + Eq,
{
    /// Creates an empty map with the default hasher builder.
    pub fn new() -> Self {
        Self::with_hasher(FxBuildHasher)
    }

    /// Creates an empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, FxBuildHasher)
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug + Hash + Eq,
    V: Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            map.entry(k, v);
        }
        map.finish()
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        HashMap {
            table: self.table.duplicate(),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Iter<'a, K, V, S> {
        self.iter()
    }
}

/// Borrowing iterator over a map's entries.
pub struct Iter<'a, K, V, S = FxBuildHasher>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    inner: crate::table::Iter<'a, MapPolicy<K, V, S>>,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        self.inner.next().map(|entry| (&entry.0, &entry.1))
    }
}
