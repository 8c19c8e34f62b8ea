//! Bounded key namespace

use crate::{Error, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::ops::Range;
use std::str::FromStr;

/// Identifier of one shared-memory segment
pub type Key = u32;

/// Collisions tolerated by [`KeyPolicy::RandomProbe`] before giving up
pub const MAX_PROBES: usize = 10;

/// How the allocator picks the next key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Sequential cursor plus a stack of released keys
    #[default]
    FreeList,
    /// Uniformly random keys, retried on collision
    RandomProbe,
}

impl FromStr for KeyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free-list" | "freelist" | "sequential" => Ok(Self::FreeList),
            "random-probe" | "random" => Ok(Self::RandomProbe),
            other => Err(Error::Config(format!("unknown key policy `{other}`"))),
        }
    }
}

enum State {
    FreeList {
        next: Key,
        stack: Vec<Key>,
        free: HashSet<Key>,
    },
    RandomProbe {
        held: HashSet<Key>,
        rng: StdRng,
    },
}

/// Issues unique keys from `[min, max)` and takes them back.
///
/// A single mutex guards every transition; allocation is not on a latency
/// critical path.
pub struct KeyAllocator {
    range: Range<Key>,
    policy: KeyPolicy,
    state: Mutex<State>,
}

impl KeyAllocator {
    /// Create an allocator over `range`
    pub fn new(range: Range<Key>, policy: KeyPolicy) -> Self {
        let state = match policy {
            KeyPolicy::FreeList => State::FreeList {
                next: range.start,
                stack: Vec::new(),
                free: HashSet::new(),
            },
            KeyPolicy::RandomProbe => State::RandomProbe {
                held: HashSet::new(),
                rng: StdRng::from_entropy(),
            },
        };

        Self {
            range,
            policy,
            state: Mutex::new(state),
        }
    }

    /// Namespace bounds
    pub fn range(&self) -> Range<Key> {
        self.range.clone()
    }

    /// Allocation policy
    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Total keys in the namespace
    pub fn capacity(&self) -> usize {
        self.range.len()
    }

    /// Number of keys currently held
    pub fn held(&self) -> usize {
        match &*self.state.lock() {
            State::FreeList { next, stack, .. } => {
                (*next - self.range.start) as usize - stack.len()
            }
            State::RandomProbe { held, .. } => held.len(),
        }
    }

    /// Allocate an unused key
    pub fn allocate(&self) -> Result<Key> {
        let mut state = self.state.lock();
        match &mut *state {
            State::FreeList { next, stack, free } => {
                if let Some(key) = stack.pop() {
                    free.remove(&key);
                    return Ok(key);
                }
                if *next >= self.range.end {
                    return Err(Error::Exhausted(format!(
                        "all {} keys in {:#x}..{:#x} are held",
                        self.range.len(),
                        self.range.start,
                        self.range.end
                    )));
                }
                let key = *next;
                *next += 1;
                Ok(key)
            }
            State::RandomProbe { held, rng } => {
                if held.len() >= self.range.len() {
                    return Err(Error::Exhausted(format!(
                        "all {} keys are held",
                        self.range.len()
                    )));
                }
                for _ in 0..MAX_PROBES {
                    let key = rng.gen_range(self.range.clone());
                    if held.insert(key) {
                        return Ok(key);
                    }
                    tracing::warn!(key, "key collision, drawing again");
                }
                Err(Error::Exhausted(format!(
                    "no free key found after {MAX_PROBES} probes"
                )))
            }
        }
    }

    /// Return a held key. Out-of-range or not-held keys are rejected with `false`.
    pub fn release(&self, key: Key) -> bool {
        if !self.range.contains(&key) {
            return false;
        }

        let mut state = self.state.lock();
        match &mut *state {
            State::FreeList { next, stack, free } => {
                if key >= *next || !free.insert(key) {
                    return false;
                }
                stack.push(key);
                true
            }
            State::RandomProbe { held, .. } => held.remove(&key),
        }
    }
}
