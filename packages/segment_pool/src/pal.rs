//! Platform abstraction layer for raw memory.
//!
//! The pool never calls the global allocator directly. It goes through a memory provider so
//! that tests can substitute a fake provider that fails on demand and keeps count of every
//! block it hands out and takes back.

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub(crate) use abstractions::MemoryProvider;
pub(crate) use facade::MemoryProviderFacade;
#[cfg(test)]
pub(crate) use fake::FakeMemoryProvider;
pub(crate) use real::SystemMemoryProvider;
