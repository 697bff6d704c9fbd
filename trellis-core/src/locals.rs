//! Typed per-request locals.
//!
//! Middleware hands values down the chain through [`Locals`] (reachable as
//! [`Context::locals`]): one handler stores a value, a later one reads it back
//! by type. Values are owned by the request and dropped when its context is
//! released.
//!
//! ```
//! use trellis_core::Locals;
//!
//! struct UserId(u64);
//!
//! let mut locals = Locals::new();
//! assert!(locals.insert(UserId(7)).is_none());
//!
//! assert_eq!(locals.get::<UserId>().map(|u| u.0), Some(7));
//! assert!(locals.get::<String>().is_none());
//! ```
//!
//! [`Context::locals`]: crate::Context::locals

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

/// One value per type.
#[derive(Default)]
pub struct Locals {
    values: HashMap<TypeId, Slot>,
}

struct Slot {
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the value of the same type it replaces.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        let slot = Slot {
            name: type_name::<T>(),
            value: Box::new(value),
        };
        self.values
            .insert(TypeId::of::<T>(), slot)
            .and_then(|old| old.value.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_mut::<T>())
    }

    /// Move the value of type `T` out.
    pub fn take<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Locals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.values.values().map(|slot| slot.name))
            .finish()
    }
}
