//! Case-insensitive multi-value header storage.

use std::{collections::TryReserveError, fmt, iter::Rev, mem, slice};

use thiserror::Error;
use tracing::{event, Level};

use crate::hash::{eq_folded, hash_folded};

/// Bucket count of a freshly created map, and the floor for shrinking.
pub const INITIAL_CAPACITY: usize = 16;

// Load factor bounds, in tenths.
const GROW_AT: usize = 6;
const SHRINK_AT: usize = 1;

/// Open-addressing map from header name to every value received for it.
///
/// Names compare ASCII case-insensitively. Setting a name that is already present appends to its
/// value list instead of replacing it.
pub struct HeaderMap {
    buckets: Vec<Bucket>,
    len: usize,
}

#[derive(Default)]
enum Bucket {
    #[default]
    Unused,
    Used(Entry),
    /// Tombstone, keeps probe chains intact and holds on to its buffers until recycled or resized.
    Deleted(Entry),
}

struct Entry {
    key: String,
    values: HeaderValues,
}

/// Failed to store a header.
#[derive(Error, Debug)]
pub enum HeaderError {
    /// Key or value storage could not be allocated.
    #[error("failed to allocate header storage")]
    Alloc(#[from] TryReserveError),

    /// The bucket array could not be reallocated, the map keeps its previous capacity.
    #[error("failed to resize header table to {capacity} buckets")]
    Resize {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
}

impl HeaderMap {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(INITIAL_CAPACITY);
        buckets.resize_with(INITIAL_CAPACITY, Bucket::default);

        Self { buckets, len: 0 }
    }

    /// Number of distinct names currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets, always a power of two.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Add `value` to the values stored under `key`.
    ///
    /// Earlier values for the same key are kept, the new value becomes the first one returned by
    /// [`HeaderValues::iter`]. On error the map contents are unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        let value = copy_str(value)?;

        if let Some(index) = self.find(key) {
            if let Bucket::Used(entry) = &mut self.buckets[index] {
                return entry.values.push(value);
            }
        }

        // A new name takes a bucket, grow before the load factor is reached
        if (self.len + 1) * 10 >= self.capacity() * GROW_AT {
            self.resize(self.capacity() * 2)?;
        }

        let index = self.vacant(key);
        let mut entry = match mem::take(&mut self.buckets[index]) {
            Bucket::Deleted(mut entry) => {
                // Recycle the tombstone's buffers
                entry.values.clear();
                if let Err(error) = reuse_str(&mut entry.key, key) {
                    self.buckets[index] = Bucket::Deleted(entry);
                    return Err(error.into());
                }
                entry
            }
            _ => Entry {
                key: copy_str(key)?,
                values: HeaderValues::default(),
            },
        };

        if let Err(error) = entry.values.push(value) {
            self.buckets[index] = Bucket::Deleted(entry);
            return Err(error);
        }

        self.buckets[index] = Bucket::Used(entry);
        self.len += 1;

        Ok(())
    }

    /// Get all values stored under `key`.
    pub fn get(&self, key: &str) -> Option<&HeaderValues> {
        let index = self.find(key)?;
        match &self.buckets[index] {
            Bucket::Used(entry) => Some(&entry.values),
            _ => None,
        }
    }

    /// Get the most recently set value for `key`.
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValues::first)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Remove `key` and all of its values.
    ///
    /// Returns `false` if the key wasn't present. If shrinking the table afterwards fails, the key
    /// is still removed and the error is returned.
    pub fn remove(&mut self, key: &str) -> Result<bool, HeaderError> {
        let Some(index) = self.find(key) else {
            return Ok(false);
        };

        if let Bucket::Used(mut entry) = mem::take(&mut self.buckets[index]) {
            entry.values = HeaderValues::default();
            self.buckets[index] = Bucket::Deleted(entry);
        }
        self.len -= 1;

        if self.capacity() > INITIAL_CAPACITY && self.len * 10 <= self.capacity() * SHRINK_AT {
            self.resize(self.capacity() / 2)?;
        }

        Ok(true)
    }

    /// Remove every header, keeping the bucket array for reuse.
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            if let Bucket::Used(entry) = mem::take(bucket) {
                *bucket = Bucket::Deleted(entry);
            }
        }

        self.len = 0;
    }

    /// Advance `cursor` to the next stored header.
    ///
    /// The map must not be changed while a cursor is in use, doing so may skip or repeat entries.
    pub fn next(&self, cursor: &mut Cursor) -> Option<(&str, &HeaderValues)> {
        while let Some(bucket) = self.buckets.get(cursor.0) {
            cursor.0 += 1;

            if let Bucket::Used(entry) = bucket {
                return Some((&entry.key, &entry.values));
            }
        }

        None
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            map: self,
            cursor: Cursor::default(),
        }
    }

    /// Find the used bucket holding `key`.
    fn find(&self, key: &str) -> Option<usize> {
        let mask = self.capacity() - 1;
        let mut index = hash_folded(key.as_bytes()) as usize & mask;

        for _ in 0..self.capacity() {
            match &self.buckets[index] {
                Bucket::Unused => return None,
                Bucket::Used(entry) if eq_folded(&entry.key, key) => return Some(index),
                _ => {}
            }

            index = (index + 1) & mask;
        }

        None
    }

    /// Find the bucket a new `key` should be placed in, the first non-used one on its chain.
    ///
    /// The caller must have checked that `key` isn't already stored.
    fn vacant(&self, key: &str) -> usize {
        let mask = self.capacity() - 1;
        let home = hash_folded(key.as_bytes()) as usize & mask;
        let mut index = home;

        // The load factor guarantees at least one non-used bucket on every chain
        for _ in 0..self.capacity() {
            if !matches!(self.buckets[index], Bucket::Used(_)) {
                return index;
            }

            index = (index + 1) & mask;
        }

        home
    }

    /// Rehash all used buckets into a table of `capacity` buckets, dropping tombstones.
    fn resize(&mut self, capacity: usize) -> Result<(), HeaderError> {
        let mut buckets = Vec::new();
        if let Err(source) = buckets.try_reserve_exact(capacity) {
            event!(Level::WARN, capacity, "failed to resize header table");
            return Err(HeaderError::Resize { capacity, source });
        }
        buckets.resize_with(capacity, Bucket::default);

        let old = mem::replace(&mut self.buckets, buckets);
        for bucket in old {
            if let Bucket::Used(entry) = bucket {
                let index = self.vacant(&entry.key);
                self.buckets[index] = Bucket::Used(entry);
            }
        }

        event!(Level::TRACE, capacity, len = self.len, "resized header table");

        Ok(())
    }
}

impl Default for HeaderMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a HeaderValues);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Opaque position in a [`HeaderMap`], for use with [`HeaderMap::next`].
#[derive(Default, Debug, Clone, Copy)]
pub struct Cursor(usize);

pub struct Iter<'a> {
    map: &'a HeaderMap,
    cursor: Cursor,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a HeaderValues);

    fn next(&mut self) -> Option<Self::Item> {
        self.map.next(&mut self.cursor)
    }
}

/// All values received for one header name, most recent first.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct HeaderValues {
    // Stored in arrival order, iteration reverses it
    values: Vec<String>,
}

impl HeaderValues {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The most recently set value.
    pub fn first(&self) -> Option<&str> {
        self.values.last().map(String::as_str)
    }

    pub fn iter(&self) -> Values<'_> {
        Values {
            inner: self.values.iter().rev(),
        }
    }

    fn push(&mut self, value: String) -> Result<(), HeaderError> {
        self.values.try_reserve(1)?;
        self.values.push(value);
        Ok(())
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for HeaderValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a HeaderValues {
    type Item = &'a str;
    type IntoIter = Values<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Values<'a> {
    inner: Rev<slice::Iter<'a, String>>,
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(String::as_str)
    }
}

fn copy_str(value: &str) -> Result<String, TryReserveError> {
    let mut buffer = String::new();
    reuse_str(&mut buffer, value)?;
    Ok(buffer)
}

fn reuse_str(buffer: &mut String, value: &str) -> Result<(), TryReserveError> {
    buffer.clear();
    buffer.try_reserve_exact(value.len())?;
    buffer.push_str(value);
    Ok(())
}
