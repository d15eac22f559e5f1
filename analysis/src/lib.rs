//! Reduction and reporting side of the ctxbench workspace: the benchmark
//! result document model, timing aggregation and the structural validator
//! the runner feeds before anything is persisted.

pub mod aggregate;
pub mod report;
pub mod validate;
