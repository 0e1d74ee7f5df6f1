//! Process-wide replacement registry, one partition per signature.
//!
//! A partition maps a target address to the replacement its proxy must run. The
//! proxy reads it on every intercepted call, so lookups take only a read lock and
//! hand back a clone of the `Arc`; no lock is held while a replacement runs.

use crate::signature::Signature;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

type Partitions = RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;

static PARTITIONS: OnceLock<Partitions> = OnceLock::new();

fn partitions() -> &'static Partitions {
    PARTITIONS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Replacements for every target of signature `F`.
pub struct Partition<F: Signature> {
    entries: RwLock<HashMap<usize, Arc<F::Replacement>>>,
}

impl<F: Signature> Partition<F> {
    fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Bind `target` to `replacement`, returning the previous binding.
    pub fn insert(&self, target: usize, replacement: Arc<F::Replacement>) -> Option<Arc<F::Replacement>> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target, replacement)
    }

    /// Drop the binding for `target`. The caller decides where the returned
    /// replacement is released.
    pub fn remove(&self, target: usize) -> Option<Arc<F::Replacement>> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&target)
    }

    pub fn get(&self, target: usize) -> Option<Arc<F::Replacement>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&target)
            .cloned()
    }

    pub fn contains(&self, target: usize) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&target)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The partition for `F`, creating it on first use.
///
/// Partitions live for the rest of the process.
pub fn register<F: Signature>() -> &'static Partition<F> {
    if let Some(partition) = registered::<F>() {
        return partition;
    }
    let mut map = partitions().write().unwrap_or_else(|e| e.into_inner());
    let erased = *map.entry(TypeId::of::<F>()).or_insert_with(|| {
        log::debug!("registry partition created for {}", std::any::type_name::<F>());
        let leaked: &'static Partition<F> = Box::leak(Box::new(Partition::<F>::new()));
        leaked as &'static (dyn Any + Send + Sync)
    });
    downcast(erased)
}

/// The partition for `F` if [`register`] has created it.
pub fn registered<F: Signature>() -> Option<&'static Partition<F>> {
    let map = partitions().read().unwrap_or_else(|e| e.into_inner());
    map.get(&TypeId::of::<F>()).map(|&erased| downcast(erased))
}

fn downcast<F: Signature>(erased: &'static (dyn Any + Send + Sync)) -> &'static Partition<F> {
    match erased.downcast_ref::<Partition<F>>() {
        Some(partition) => partition,
        None => {
            // Entries are keyed by the partition's own TypeId.
            log::error!("registry partition for {} has the wrong type", std::any::type_name::<F>());
            std::process::abort()
        }
    }
}
