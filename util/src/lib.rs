use std::collections::{HashMap, HashSet};

pub mod futures;
pub mod metrics;
pub mod serde_helpers;
pub mod time;


pub type FastHasherState = ahash::RandomState;
pub type FastHashMap<K, V> = HashMap<K, V, FastHasherState>;
pub type FastHashSet<K> = HashSet<K, FastHasherState>;
