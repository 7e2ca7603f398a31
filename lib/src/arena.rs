use std::{
    collections::BTreeMap,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

/// Id-addressed storage. Iteration always follows id order, so anything
/// walking an arena sees the same sequence on every run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Arena<Id: IdLike + Ord + Copy, T> {
    inner: BTreeMap<Id, T>,
}

impl<Id: IdLike + Ord + Copy, T> Arena<Id, T> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn next_id(&self) -> Id {
        self.inner
            .last_key_value()
            .map_or(Id::from_raw(0), |(id, _)| Id::from_raw(id.into_raw() + 1))
    }

    pub fn push(&mut self, x: T) -> Id {
        let id = self.next_id();
        self.inner.insert(id, x);
        id
    }

    pub fn insert(&mut self, id: Id, x: T) -> Option<T> {
        self.inner.insert(id, x)
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        self.inner.remove(&id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.inner.contains_key(&id)
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.inner.get(&id)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.inner.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.inner.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> {
        self.inner.iter().map(|(i, v)| (*i, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)> {
        self.inner.iter_mut().map(|(i, v)| (*i, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.inner.values()
    }
}

impl<Id: IdLike + Ord + Copy, T> Default for Arena<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: IdLike + Ord + Copy, T> Index<Id> for Arena<Id, T> {
    type Output = T;

    fn index(&self, index: Id) -> &Self::Output {
        &self.inner[&index]
    }
}

impl<Id: IdLike + Ord + Copy, T> IndexMut<Id> for Arena<Id, T> {
    fn index_mut(&mut self, index: Id) -> &mut Self::Output {
        self.inner
            .get_mut(&index)
            .expect("arena index out of bounds")
    }
}

impl<Id: IdLike + Ord + Copy, T> FromIterator<(Id, T)> for Arena<Id, T> {
    fn from_iter<I: IntoIterator<Item = (Id, T)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

pub trait IdLike {
    fn from_raw(index: usize) -> Self;
    fn into_raw(self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct Id(u32);

    impl IdLike for Id {
        fn from_raw(index: usize) -> Self {
            Self(index as u32)
        }

        fn into_raw(self) -> usize {
            self.0 as usize
        }
    }

    #[test]
    fn push_continues_after_highest_id() {
        let mut arena = Arena::new();
        arena.insert(Id(7), "a");
        assert_eq!(arena.push("b"), Id(8));
        arena.remove(Id(8));
        assert_eq!(arena.push("c"), Id(8));
    }

    #[test]
    fn iteration_is_ordered_by_id() {
        let arena: Arena<Id, u8> = [(Id(3), 3), (Id(1), 1), (Id(2), 2)].into_iter().collect();
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![Id(1), Id(2), Id(3)]);
    }
}
