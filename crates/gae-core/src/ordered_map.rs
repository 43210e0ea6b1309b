//! A sequence that is addressable both by position and by a unique key.
//!
//! Element order is positional (insertion order), never key order. The key
//! index is a `BTreeMap` from key to position and is shifted on every
//! insert/erase, so each of those is O(n) and n successive inserts into one
//! map cost O(n^2). Expanding or promoting n items under one parent hits
//! that bound; it is fine at the sizes this crate deals with (child lists,
//! archive entries).

use crate::error::{Error, Result};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::ops::Range;

/// Extracts the key an element is indexed under. The key of an element must
/// not change while it is stored in an [`OrderedMap`].
pub trait KeyOf {
    type Key: Ord + Clone;
    fn key(&self) -> &Self::Key;
}

#[derive(Debug, Clone)]
pub struct OrderedMap<T: KeyOf> {
    items: Vec<T>,
    index: BTreeMap<T::Key, usize>,
}

impl<T: KeyOf> Default for OrderedMap<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: BTreeMap::new(),
        }
    }
}

impl<T: KeyOf> OrderedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn nth(&self, i: usize) -> Option<&T> {
        self.items.get(i)
    }

    /// Mutable access; the element's key must stay the same.
    pub fn nth_mut(&mut self, i: usize) -> Option<&mut T> {
        self.items.get_mut(i)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Mutable iteration; keys must stay the same.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    /// Position and element stored under `key`.
    pub fn find<Q>(&self, key: &Q) -> Option<(usize, &T)>
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let i = *self.index.get(key)?;
        Some((i, &self.items[i]))
    }

    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<(usize, &mut T)>
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let i = *self.index.get(key)?;
        Some((i, &mut self.items[i]))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        T::Key: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Position of an element, looked up through its key.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        self.index.get(value.key()).copied()
    }

    /// Inserts before position `at`. A duplicate key is rejected: nothing is
    /// inserted and the position of the present element is returned with
    /// `false`.
    pub fn insert(&mut self, at: usize, value: T) -> Result<(usize, bool)> {
        if at > self.items.len() {
            return Err(Error::invalid(format!(
                "insert position {at} past end {}",
                self.items.len()
            )));
        }
        if let Some(&existing) = self.index.get(value.key()) {
            return Ok((existing, false));
        }
        for pos in self.index.values_mut() {
            if *pos >= at {
                *pos += 1;
            }
        }
        self.index.insert(value.key().clone(), at);
        self.items.insert(at, value);
        Ok((at, true))
    }

    pub fn push_back(&mut self, value: T) -> (usize, bool) {
        let at = self.items.len();
        match self.insert(at, value) {
            Ok(r) => r,
            Err(_) => unreachable!("insert at len is always in range"),
        }
    }

    /// Removes the element at `i`.
    pub fn erase(&mut self, i: usize) -> Result<T> {
        Ok(self.erase_range(i..i + 1)?.remove(0))
    }

    /// Removes `range`, returning the removed elements in order.
    pub fn erase_range(&mut self, range: Range<usize>) -> Result<Vec<T>> {
        if range.start > range.end || range.end > self.items.len() {
            return Err(Error::invalid(format!(
                "erase range {range:?} out of 0..{}",
                self.items.len()
            )));
        }
        let removed: Vec<T> = self.items.drain(range.clone()).collect();
        for v in &removed {
            self.index.remove(v.key());
        }
        let n = removed.len();
        for pos in self.index.values_mut() {
            if *pos >= range.end {
                *pos -= n;
            }
        }
        Ok(removed)
    }
}

impl<'a, T: KeyOf> IntoIterator for &'a OrderedMap<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
