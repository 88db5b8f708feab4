//! Zero-allocation wire-format cache: a preallocated slotted ring with
//! a striped index, linear probing, and CAS-style ring-head eviction.
//! The hit path never touches the heap — it copies straight out of a
//! preallocated entry buffer into the caller's own buffer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Largest wire message a slot can hold; matches `kubedns-proto`'s
/// `MAX_WIRE_SIZE` (EDNS0-safe).
pub const MAX_WIRE_SIZE: usize = 4096;
pub const ENTRY_COUNT: usize = 10_000;
/// Power of two, as required for the `hash mod INDEX_SIZE` bucketing.
pub const INDEX_SIZE: usize = 16_384;
pub const LOCK_STRIPES: usize = 256;
pub const MAX_PROBE: usize = 16;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the domain bytes, mixed with the query type. Identity
/// of a cache entry; collisions are disambiguated by linear probing.
pub fn fingerprint(qname: &str, qtype: u16) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in qname.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash ^= qtype as u64;
    hash.wrapping_mul(FNV_PRIME)
}

struct Entry {
    hash: AtomicU64,
    wire: UnsafeCell<[u8; MAX_WIRE_SIZE]>,
    wire_len: AtomicU32,
    expiry: AtomicI64,
    /// 0 = empty, 1 = occupied. Gates visibility of `wire`/`wire_len`:
    /// the store path writes the payload first, then sets this with
    /// `Release`; the get path checks this with `Acquire` before
    /// trusting the payload.
    occupied: AtomicI32,
}

// SAFETY: `wire` is only ever written by the single writer that
// claimed this slot via the ring-head counter, and only read after
// observing `occupied == 1` with Acquire ordering, which pairs with
// the writer's Release store below.
unsafe impl Sync for Entry {}

impl Entry {
    fn empty() -> Self {
        Self {
            hash: AtomicU64::new(0),
            wire: UnsafeCell::new([0u8; MAX_WIRE_SIZE]),
            wire_len: AtomicU32::new(0),
            expiry: AtomicI64::new(0),
            occupied: AtomicI32::new(0),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub occupancy: usize,
    pub capacity: usize,
}

pub struct WireCache {
    entries: Box<[Entry]>,
    index: Box<[AtomicI32]>,
    stripes: Box<[RwLock<()>]>,
    ring_head: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl Default for WireCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCache {
    pub fn new() -> Self {
        Self {
            entries: (0..ENTRY_COUNT).map(|_| Entry::empty()).collect(),
            index: (0..INDEX_SIZE).map(|_| AtomicI32::new(-1)).collect(),
            stripes: (0..LOCK_STRIPES).map(|_| RwLock::new(())).collect(),
            ring_head: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Copies the cached wire (if present, occupied, and unexpired)
    /// into `out`. `now` is an absolute clock value in the same units
    /// as the `ttl_secs` passed to `store`. Allocation-free.
    pub fn get(&self, qname: &str, qtype: u16, now: i64, out: &mut [u8; MAX_WIRE_SIZE]) -> Option<usize> {
        let hash = fingerprint(qname, qtype);
        let base = (hash % INDEX_SIZE as u64) as usize;

        for probe in 0..MAX_PROBE {
            let bucket = (base + probe) % INDEX_SIZE;
            let _guard = self.stripes[bucket % LOCK_STRIPES].read();

            let slot = self.index[bucket].load(Ordering::Acquire);
            if slot < 0 {
                continue;
            }
            let entry = &self.entries[slot as usize];
            if entry.occupied.load(Ordering::Acquire) != 1 {
                continue;
            }
            if entry.hash.load(Ordering::Relaxed) != hash {
                continue;
            }
            if entry.expiry.load(Ordering::Relaxed) < now {
                entry.occupied.store(0, Ordering::Release);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            let len = entry.wire_len.load(Ordering::Relaxed) as usize;
            // SAFETY: occupied == 1 observed with Acquire, paired with
            // the Release store at the end of `store`.
            let wire = unsafe { &*entry.wire.get() };
            out[..len].copy_from_slice(&wire[..len]);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(len);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores `wire` under `(qname, qtype)` with expiry `now +
    /// ttl_secs`. Rejects oversized wires and zero-TTL responses.
    pub fn store(&self, qname: &str, qtype: u16, wire: &[u8], ttl_secs: u32, now: i64) -> bool {
        if wire.len() > MAX_WIRE_SIZE || ttl_secs == 0 {
            return false;
        }

        let hash = fingerprint(qname, qtype);
        let slot = self.ring_head.fetch_add(1, Ordering::Relaxed) % ENTRY_COUNT;
        let entry = &self.entries[slot];

        if entry.occupied.load(Ordering::Acquire) == 1 {
            let old_hash = entry.hash.load(Ordering::Relaxed);
            self.remove_from_index(old_hash, slot as i32);
        }
        entry.occupied.store(0, Ordering::Relaxed);

        // SAFETY: occupied == 0 right now, so no concurrent reader
        // will trust this buffer until the Release store below.
        let buf = unsafe { &mut *entry.wire.get() };
        buf[..wire.len()].copy_from_slice(wire);
        entry.wire_len.store(wire.len() as u32, Ordering::Relaxed);
        entry.hash.store(hash, Ordering::Relaxed);
        entry.expiry.store(now + ttl_secs as i64, Ordering::Relaxed);
        entry.occupied.store(1, Ordering::Release);

        self.insert_into_index(hash, slot as i32);
        self.stores.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Walks every entry and clears any that have passed their
    /// expiry. Intended to run on a 10 s interval.
    pub fn sweep_expired(&self, now: i64) {
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.occupied.load(Ordering::Acquire) != 1 {
                continue;
            }
            if entry.expiry.load(Ordering::Relaxed) < now {
                let hash = entry.hash.load(Ordering::Relaxed);
                entry.occupied.store(0, Ordering::Release);
                self.remove_from_index(hash, idx as i32);
            }
        }
    }

    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.occupied.store(0, Ordering::Release);
        }
        for slot in self.index.iter() {
            slot.store(-1, Ordering::Release);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let occupancy = self
            .entries
            .iter()
            .filter(|e| e.occupied.load(Ordering::Acquire) == 1)
            .count();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            occupancy,
            capacity: ENTRY_COUNT,
        }
    }

    fn remove_from_index(&self, hash: u64, slot: i32) {
        let base = (hash % INDEX_SIZE as u64) as usize;
        for probe in 0..MAX_PROBE {
            let bucket = (base + probe) % INDEX_SIZE;
            let _guard = self.stripes[bucket % LOCK_STRIPES].write();
            if self.index[bucket].load(Ordering::Acquire) == slot {
                self.index[bucket].store(-1, Ordering::Release);
                return;
            }
        }
    }

    fn insert_into_index(&self, hash: u64, slot: i32) {
        let base = (hash % INDEX_SIZE as u64) as usize;
        for probe in 0..MAX_PROBE {
            let bucket = (base + probe) % INDEX_SIZE;
            let _guard = self.stripes[bucket % LOCK_STRIPES].write();
            if self.index[bucket].load(Ordering::Acquire) == -1 {
                self.index[bucket].store(slot, Ordering::Release);
                return;
            }
        }
        tracing::warn!("index probe chain exhausted, entry is unreachable by hash until evicted");
    }
}
