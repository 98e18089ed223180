// src/jobs/mod.rs

//! Jobs and Transfers, their materialization from trigger events, and
//! chain continuation.

pub mod chain;
pub mod materializer;
pub mod model;

pub use chain::{continue_chain, next_hop_index, ChainStep};
pub use materializer::{ManualJobRequest, Materialized, Materializer};
pub use model::{Job, Transfer};
