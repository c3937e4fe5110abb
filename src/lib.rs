//! Staking Core Library
//!
//! Accounting core of a liquid-staking pool: oracle consensus, the
//! snapshot-based exchange rate and the withdrawal queue.
//! Used by the `staking_sim` binary and the integration tests.

pub mod staking;
