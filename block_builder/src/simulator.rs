//! The circuit boundary: simulation produces each circuit's public
//! outputs, proving attests to them.
//!
//! Both traits are async because real backends dispatch to worker pools
//! or remote provers; failures cross the boundary as [`anyhow::Error`]
//! and surface as circuit errors to the builder's caller.

use anyhow::Result;

use crate::rollup_types::{
    BaseOrMergeRollupOutputs, BaseRollupInputs, MergeRollupInputs, Proof, RootRollupInputs,
    RootRollupOutputs,
};

/// Computes the public outputs of each rollup circuit.
pub trait RollupSimulator: Send + Sync {
    fn base_rollup(
        &self,
        inputs: &BaseRollupInputs,
    ) -> impl std::future::Future<Output = Result<BaseOrMergeRollupOutputs>> + Send;

    fn merge_rollup(
        &self,
        inputs: &MergeRollupInputs,
    ) -> impl std::future::Future<Output = Result<BaseOrMergeRollupOutputs>> + Send;

    fn root_rollup(
        &self,
        inputs: &RootRollupInputs,
    ) -> impl std::future::Future<Output = Result<RootRollupOutputs>> + Send;
}

/// Produces proofs for already-simulated circuit outputs.
pub trait RollupProver: Send + Sync {
    fn prove_base(
        &self,
        inputs: &BaseRollupInputs,
        outputs: &BaseOrMergeRollupOutputs,
    ) -> impl std::future::Future<Output = Result<Proof>> + Send;

    fn prove_merge(
        &self,
        inputs: &MergeRollupInputs,
        outputs: &BaseOrMergeRollupOutputs,
    ) -> impl std::future::Future<Output = Result<Proof>> + Send;

    fn prove_root(
        &self,
        inputs: &RootRollupInputs,
        outputs: &RootRollupOutputs,
    ) -> impl std::future::Future<Output = Result<Proof>> + Send;
}
