//! Concurrency primitives shared by the worker loop and batch tasks.

pub mod shutdown;
