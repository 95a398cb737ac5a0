//! Replicated collections.
//!
//! Each collection is plain state plus an operation enum; wrap it in a
//! [`ChangeLog`] (usually through the object registry) to replicate it. The
//! mutators on `ChangeLog<..>` apply locally and record the change.
//!
//! Replacing operations (`Set` on a value, `Clear` on a list or map) fully
//! determine the resulting state, which is what allows them to drop earlier
//! unflushed changes from the log.

use std::collections::BTreeMap;

use crate::{
    unit::{ChangeLog, Operation, Replicated, UnitError},
    wire::{Field, Reader, WireError, Writer},
};

/// Bound shared by collection elements.
pub trait Element: Field + Clone + Send + 'static {}

impl<T: Field + Clone + Send + 'static> Element for T {}

/// A single replicated register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value<T> {
    value: T,
}

impl<T> Value<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueOp<T> {
    Set(T),
}

impl<T: Element> Operation for ValueOp<T> {
    fn tag(&self) -> u8 {
        0
    }

    fn write_args(&self, w: &mut Writer) {
        let ValueOp::Set(v) = self;
        v.write(w);
    }

    fn read(tag: u8, r: &mut Reader<'_>) -> Result<Self, WireError> {
        match tag {
            0 => Ok(ValueOp::Set(T::read(r)?)),
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

impl<T: Element> Replicated for Value<T> {
    type Op = ValueOp<T>;

    fn write_full(&self, w: &mut Writer) {
        self.value.write(w);
    }

    fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        self.value = T::read(r)?;
        Ok(())
    }

    fn apply(&mut self, op: &ValueOp<T>) {
        let ValueOp::Set(v) = op;
        self.value = v.clone();
    }
}

impl<T: Element> ChangeLog<Value<T>> {
    pub fn get(&self) -> &T {
        self.state().get()
    }

    pub fn set(&mut self, value: T) -> Result<(), UnitError> {
        self.mutate(false, ValueOp::Set(value))
    }
}

/// A replicated sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List<T> {
    items: Vec<T>,
}

impl<T> List<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListOp<T> {
    Push(T),
    Insert(u32, T),
    Set(u32, T),
    RemoveAt(u32),
    Clear,
}

impl<T: Element> Operation for ListOp<T> {
    fn tag(&self) -> u8 {
        match self {
            ListOp::Push(_) => 0,
            ListOp::Insert(..) => 1,
            ListOp::Set(..) => 2,
            ListOp::RemoveAt(_) => 3,
            ListOp::Clear => 4,
        }
    }

    fn write_args(&self, w: &mut Writer) {
        match self {
            ListOp::Push(v) => v.write(w),
            ListOp::Insert(i, v) | ListOp::Set(i, v) => {
                w.write_u32(*i);
                v.write(w);
            }
            ListOp::RemoveAt(i) => w.write_u32(*i),
            ListOp::Clear => {}
        }
    }

    fn read(tag: u8, r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(match tag {
            0 => ListOp::Push(T::read(r)?),
            1 => ListOp::Insert(r.read_u32()?, T::read(r)?),
            2 => ListOp::Set(r.read_u32()?, T::read(r)?),
            3 => ListOp::RemoveAt(r.read_u32()?),
            4 => ListOp::Clear,
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

impl<T: Element> Replicated for List<T> {
    type Op = ListOp<T>;

    fn write_full(&self, w: &mut Writer) {
        w.write_i32(self.items.len() as i32);
        for item in &self.items {
            item.write(w);
        }
    }

    fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        let count = r.read_i32()?;
        if count < 0 {
            return Err(WireError::NegativeLength(count));
        }
        let mut items = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            items.push(T::read(r)?);
        }
        self.items = items;
        Ok(())
    }

    // Out-of-range indices are ignored; the authoritative side never emits them.
    fn apply(&mut self, op: &ListOp<T>) {
        match op {
            ListOp::Push(v) => self.items.push(v.clone()),
            ListOp::Insert(i, v) => {
                let i = *i as usize;
                if i <= self.items.len() {
                    self.items.insert(i, v.clone());
                }
            }
            ListOp::Set(i, v) => {
                if let Some(slot) = self.items.get_mut(*i as usize) {
                    *slot = v.clone();
                }
            }
            ListOp::RemoveAt(i) => {
                let i = *i as usize;
                if i < self.items.len() {
                    self.items.remove(i);
                }
            }
            ListOp::Clear => self.items.clear(),
        }
    }
}

impl<T: Element> ChangeLog<List<T>> {
    pub fn items(&self) -> &[T] {
        self.state().items()
    }

    pub fn push(&mut self, value: T) -> Result<(), UnitError> {
        self.mutate(true, ListOp::Push(value))
    }

    pub fn insert(&mut self, index: u32, value: T) -> Result<(), UnitError> {
        self.mutate(true, ListOp::Insert(index, value))
    }

    pub fn set(&mut self, index: u32, value: T) -> Result<(), UnitError> {
        self.mutate(true, ListOp::Set(index, value))
    }

    pub fn remove_at(&mut self, index: u32) -> Result<(), UnitError> {
        self.mutate(true, ListOp::RemoveAt(index))
    }

    pub fn clear(&mut self) -> Result<(), UnitError> {
        self.mutate(false, ListOp::Clear)
    }
}

/// A replicated ordered map.
#[derive(Debug, Clone, PartialEq)]
pub struct Map<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Map<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Map<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<K, V> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOp<K, V> {
    Insert(K, V),
    Remove(K),
    Clear,
}

impl<K: Element, V: Element> Operation for MapOp<K, V> {
    fn tag(&self) -> u8 {
        match self {
            MapOp::Insert(..) => 0,
            MapOp::Remove(_) => 1,
            MapOp::Clear => 2,
        }
    }

    fn write_args(&self, w: &mut Writer) {
        match self {
            MapOp::Insert(k, v) => {
                k.write(w);
                v.write(w);
            }
            MapOp::Remove(k) => k.write(w),
            MapOp::Clear => {}
        }
    }

    fn read(tag: u8, r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(match tag {
            0 => MapOp::Insert(K::read(r)?, V::read(r)?),
            1 => MapOp::Remove(K::read(r)?),
            2 => MapOp::Clear,
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

impl<K: Element + Ord, V: Element> Replicated for Map<K, V> {
    type Op = MapOp<K, V>;

    fn write_full(&self, w: &mut Writer) {
        w.write_i32(self.entries.len() as i32);
        for (k, v) in &self.entries {
            k.write(w);
            v.write(w);
        }
    }

    fn read_full(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        let count = r.read_i32()?;
        if count < 0 {
            return Err(WireError::NegativeLength(count));
        }
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let k = K::read(r)?;
            let v = V::read(r)?;
            entries.insert(k, v);
        }
        self.entries = entries;
        Ok(())
    }

    fn apply(&mut self, op: &MapOp<K, V>) {
        match op {
            MapOp::Insert(k, v) => {
                self.entries.insert(k.clone(), v.clone());
            }
            MapOp::Remove(k) => {
                self.entries.remove(k);
            }
            MapOp::Clear => self.entries.clear(),
        }
    }
}

impl<K: Element + Ord, V: Element> ChangeLog<Map<K, V>> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.state().get(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<(), UnitError> {
        self.mutate(true, MapOp::Insert(key, value))
    }

    pub fn remove(&mut self, key: K) -> Result<(), UnitError> {
        self.mutate(true, MapOp::Remove(key))
    }

    pub fn clear(&mut self) -> Result<(), UnitError> {
        self.mutate(false, MapOp::Clear)
    }
}
