//! Owner and observer of a bus mapping.
//!
//! A tag keeps the only [Handle] of each live mapping in its mapping table. Every bus-space
//! handle and sub-region derived from that mapping carries a [HandleRef] instead, so removing
//! the table entry on unmap retires all of them at once and later accesses can tell. Tags share
//! their own state through a [Handle] as well.
use alloc::sync::{Arc, Weak};
use core::ops::Deref;

#[derive(Debug)]
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Handle<T> {
    /// Observer of this mapping that does not keep it alive.
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug)]
pub struct HandleRef<T> {
    inner: Weak<T>,
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> HandleRef<T> {
    /// Whether the owner has dropped the object.
    pub fn is_dead(&self) -> bool {
        self.inner.strong_count() == 0
    }
}
