//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the loop.
//! In particular, it exposes a [`Slab`] allocator used for fast indexed
//! storage with reuse of freed slots; its indices double as poller tokens.

mod slab;

pub(crate) use slab::Slab;
