//! Reference-keyed collections used while walking and editing the object graph.

use super::objects::PDFObjRef;
use indexmap::IndexMap;
use indexmap::map::Entry;
use std::collections::HashSet;

/// Visited set for one graph walk.
#[derive(Debug, Default, Clone)]
pub struct RefSet {
    refs: HashSet<PDFObjRef>,
}

impl RefSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the reference was already present.
    pub fn put(&mut self, r: PDFObjRef) -> bool {
        self.refs.insert(r)
    }

    pub fn has(&self, r: &PDFObjRef) -> bool {
        self.refs.contains(r)
    }

    pub fn remove(&mut self, r: &PDFObjRef) {
        self.refs.remove(r);
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Insertion-ordered map from reference to payload.
///
/// One save owns one cache: the first clone of a dictionary lands here and
/// every later edit of the same reference goes to that clone.
#[derive(Debug, Clone)]
pub struct RefSetCache<T> {
    map: IndexMap<PDFObjRef, T>,
}

impl<T> Default for RefSetCache<T> {
    fn default() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }
}

impl<T> RefSetCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, r: &PDFObjRef) -> Option<&T> {
        self.map.get(r)
    }

    pub fn get_mut(&mut self, r: &PDFObjRef) -> Option<&mut T> {
        self.map.get_mut(r)
    }

    pub fn has(&self, r: &PDFObjRef) -> bool {
        self.map.contains_key(r)
    }

    /// Insert or replace; a replaced entry keeps its original position.
    pub fn put(&mut self, r: PDFObjRef, value: T) {
        self.map.insert(r, value);
    }

    /// Return the cached payload, creating it with `init` on first access.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        r: PDFObjRef,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<&mut T, E> {
        match self.map.entry(r) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(init()?)),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PDFObjRef, &T)> {
        self.map.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.map.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PDFObjRef> {
        self.map.keys()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<T> IntoIterator for RefSetCache<T> {
    type Item = (PDFObjRef, T);
    type IntoIter = indexmap::map::IntoIter<PDFObjRef, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

impl<T> Extend<(PDFObjRef, T)> for RefSetCache<T> {
    fn extend<I: IntoIterator<Item = (PDFObjRef, T)>>(&mut self, iter: I) {
        self.map.extend(iter);
    }
}
