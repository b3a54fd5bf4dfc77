//! The State Machine: one local validator's progression through (H, R)
//! (spec §4.2). `StateMachine<S>` is a handle around a single kernel task;
//! everything it owns is reached only through that task's channels.

mod kernel;
pub mod steps;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::{BlockDataArrived, FinalizeBlockRequest, InitChainRequest, LagState};
use crate::mirror::Mirror;
use crate::scheme::ConsensusScheme;
use crate::store::{ActionStore, FinalizationStore, StateMachineStore, ValidatorStore};
use crate::strategy::{ConsensusStrategy, TimeoutStrategy};

pub use steps::Step;

/// This validator's signing identity, or `None` to run in follower mode
/// (spec §4.2: "never emits actions but still consumes views").
#[derive(Clone)]
pub struct LocalSigner {
    pub pub_key: crate::validator::PubKey,
    pub secret_key: Vec<u8>,
}

/// Everything the kernel needs to persist or call out to, bundled so
/// `StateMachine::spawn` doesn't take a dozen separate parameters.
pub struct StateMachineStores {
    pub actions: Arc<dyn ActionStore>,
    pub finalizations: Arc<dyn FinalizationStore>,
    pub validators: Arc<dyn ValidatorStore>,
    pub state_machine: Arc<dyn StateMachineStore>,
}

const BLOCK_DATA_CHANNEL_CAPACITY: usize = 16;

/// Handle to the running state-machine kernel task.
pub struct StateMachine {
    block_data_tx: mpsc::Sender<BlockDataArrived>,
}

impl StateMachine {
    /// Spawn the kernel task and return a handle. `start` is the (height,
    /// round) to enter first, normally reloaded from `StateMachineStore`.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<S: ConsensusScheme>(
        scheme: Arc<S>,
        mirror: Mirror<S>,
        strategy: Arc<dyn ConsensusStrategy>,
        timeouts: Arc<dyn TimeoutStrategy>,
        stores: StateMachineStores,
        signer: Option<LocalSigner>,
        start: (u64, u32),
        init_chain_tx: mpsc::Sender<InitChainRequest>,
        finalize_block_tx: mpsc::Sender<FinalizeBlockRequest>,
        lag_tx: mpsc::Sender<LagState>,
        cancel: CancellationToken,
    ) -> Self {
        let (block_data_tx, block_data_rx) = mpsc::channel(BLOCK_DATA_CHANNEL_CAPACITY);

        let kernel = kernel::StateMachineKernel::new(
            scheme,
            mirror,
            strategy,
            timeouts,
            stores,
            signer,
            start,
            init_chain_tx,
            finalize_block_tx,
            lag_tx,
            block_data_rx,
            cancel,
        );
        tokio::spawn(kernel.run());

        Self { block_data_tx }
    }

    /// spec §4.2 "Block-data-arrival channel": notify the kernel that the
    /// application has the data for a previously-unresolved `data_id`.
    pub async fn block_data_arrived(&self, event: BlockDataArrived) {
        let _ = self.block_data_tx.send(event).await;
    }
}
