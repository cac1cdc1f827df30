//! Turns batches of kernel-proven transactions into proven L2 blocks.
//!
//! The [`BlockBuilder`] owns the orchestration: it applies each
//! transaction pair's state effects to the world state trees, gathers the
//! witnesses the rollup circuits consume, folds the resulting proofs
//! through merge circuits, and finalizes the block with the root circuit.
//! Circuit simulation and proving are behind the [`RollupSimulator`] and
//! [`RollupProver`] traits, so the pipeline runs identically against a
//! local simulator or a remote proving cluster.

pub mod block_builder;
pub mod processed_tx;
pub mod rollup_types;
pub mod simulator;

pub use block_builder::{BlockBuilder, BlockBuilderError, BlockBuilderResult};
pub use processed_tx::{
    GasFees, GlobalVariables, HistoricalTreeRoots, ProcessedTx, PublicDataWrite,
};
pub use rollup_types::{
    AssembledBlock, BaseOrMergeRollupOutputs, BaseRollupInputs, BlockStateSnapshots,
    ConstantRollupData, L2Block, MergeRollupInputs, PreviousRollupData, Proof, RollupKind,
    RootRollupInputs, RootRollupOutputs,
};
pub use simulator::{RollupProver, RollupSimulator};
