//! Open addressing hash table keyed by interned strings.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::gc::{GcTracer, ObjRef, Trace};
use crate::value::Value;

/// Grow once more than three quarters of the slots are taken, tombstones
/// included.
const MAX_LOAD_NUMERATOR: usize = 3;
const MAX_LOAD_DENOMINATOR: usize = 4;
const MIN_CAPACITY: usize = 8;

/// Hash of a string's bytes: FNV-1a, folded to 32 bits.
pub fn hash_str(s: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    let h = hasher.finish();
    (h ^ (h >> 32)) as u32
}

/// A table key: an interned string together with its cached hash.
///
/// Keys compare by object identity, which is content equality because every
/// string is interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrKey {
    pub obj: ObjRef,
    pub hash: u32,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<StrKey>,
    /// For a keyless entry, `Nil` marks a never used slot and anything else
    /// a tombstone.
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        value: Value::Nil,
    };

    const TOMBSTONE: Entry = Entry {
        key: None,
        value: Value::Bool(true),
    };

    fn is_vacant(&self) -> bool {
        self.key.is_none() && self.value.is_nil()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Occupied slots including tombstones
    used: usize,
    /// Live entries
    len: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn heap_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// Index of the slot holding `key`, or of the slot it should be inserted
    /// into (reusing the first tombstone seen on the way).
    fn find_slot(entries: &[Entry], key: StrKey) -> usize {
        let mask = entries.len() - 1;
        let mut index = key.hash as usize & mask;
        let mut tombstone = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if k.obj == key.obj => return index,
                Some(_) => {}
                None if entry.value.is_nil() => return tombstone.unwrap_or(index),
                None => {
                    tombstone.get_or_insert(index);
                }
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: StrKey) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_slot(&self.entries, key)];
        entry.key.map(|_| entry.value)
    }

    pub fn contains_key(&self, key: StrKey) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites `key`. Returns `true` if the key was not present.
    pub fn set(&mut self, key: StrKey, value: Value) -> bool {
        if (self.used + 1) * MAX_LOAD_DENOMINATOR > self.capacity() * MAX_LOAD_NUMERATOR {
            self.grow();
        }
        let index = Self::find_slot(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new {
            self.len += 1;
            if entry.is_vacant() {
                self.used += 1;
            }
        }
        *entry = Entry {
            key: Some(key),
            value,
        };
        is_new
    }

    /// Removes `key`, leaving a tombstone so that probe sequences passing
    /// through this slot stay intact.
    pub fn delete(&mut self, key: StrKey) -> bool {
        if self.len == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry::TOMBSTONE;
        self.len -= 1;
        true
    }

    /// Copies every entry of `self` into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for (key, value) in self.iter() {
            to.set(key, value);
        }
    }

    /// Looks up an interned string by content. `eq` is asked to compare the
    /// candidate objects whose hash matches.
    pub fn find_string(&self, hash: u32, mut eq: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.len == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                Some(k) if k.hash == hash && eq(k.obj) => return Some(k.obj),
                Some(_) => {}
                None if entry.value.is_nil() => return None,
                None => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Deletes every entry whose key is not marked. Used on the intern table
    /// right before sweeping, since that table does not keep strings alive.
    pub fn remove_white(&mut self, mut is_marked: impl FnMut(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_marked(key.obj) {
                    *entry = Entry::TOMBSTONE;
                    self.len -= 1;
                }
            }
        }
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (StrKey, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|key| (key, e.value)))
    }

    fn grow(&mut self) {
        let capacity = (self.capacity() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);
        self.used = 0;
        self.len = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_slot(&self.entries, key);
                self.entries[index] = entry;
                self.used += 1;
                self.len += 1;
            }
        }
    }
}

impl Trace for Table {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        for (key, value) in self.iter() {
            tracer.mark_object(key.obj);
            tracer.mark_value(value);
        }
    }
}
