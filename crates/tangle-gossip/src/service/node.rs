//! # Gossip Node
//!
//! Wires the router, the intake pipeline and the periodic workers together
//! and owns their lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::adapters::NeighborRouter;
use crate::domain::GossipConfig;
use crate::events::GossipError;
use crate::neighbor::NeighborHandle;
use crate::ports::{
    MilestoneTracker, NeighborDirectory, SnapshotProvider, TangleStore, TipsProvider,
};
use crate::service::broadcaster::TransactionBroadcaster;
use crate::service::gossip::TransactionGossiper;
use crate::service::pipeline::TransactionProcessingPipeline;
use crate::service::requester::{RequesterConfig, TransactionRequester};
use crate::service::requester_worker::TransactionRequesterWorker;
use crate::service::scheduler::{spawn_periodic, ScheduledTask};
use crate::service::solidifier::TransactionSolidifier;
use crate::service::tips_requester::TipsRequester;

/// Upper bound between pipeline passes when no wakeup arrives.
const PIPELINE_IDLE_DELAY: Duration = Duration::from_millis(100);

/// External collaborators the node runs against.
#[derive(Clone)]
pub struct NodePorts {
    pub store: Arc<dyn TangleStore>,
    pub snapshot: Arc<dyn SnapshotProvider>,
    pub tips: Arc<dyn TipsProvider>,
    pub milestones: Arc<dyn MilestoneTracker>,
}

impl NodePorts {
    /// Uses one adapter for every port.
    pub fn from_single<T>(tangle: Arc<T>) -> Self
    where
        T: TangleStore + SnapshotProvider + TipsProvider + MilestoneTracker + 'static,
    {
        Self {
            store: tangle.clone(),
            snapshot: tangle.clone(),
            tips: tangle.clone(),
            milestones: tangle,
        }
    }
}

/// A running gossip layer.
pub struct GossipNode {
    router: Arc<NeighborRouter>,
    requester: Arc<TransactionRequester>,
    solidifier: Arc<TransactionSolidifier>,
    pipeline: Arc<TransactionProcessingPipeline>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<ScheduledTask>,
    shutdown_grace: Duration,
}

impl GossipNode {
    /// Binds the router and starts every worker.
    pub async fn start(config: GossipConfig, ports: NodePorts) -> Result<Self, GossipError> {
        config.validate()?;
        let NodePorts {
            store,
            snapshot,
            tips,
            milestones,
        } = ports;

        let requester = Arc::new(TransactionRequester::new(
            store.clone(),
            snapshot.clone(),
            RequesterConfig::from(&config),
        ));
        let gossiper = TransactionGossiper::new(requester.clone());
        let solidifier = Arc::new(TransactionSolidifier::new(
            store.clone(),
            snapshot.clone(),
            requester.clone(),
            &config,
        ));
        let pipeline = Arc::new(TransactionProcessingPipeline::new(
            gossiper.clone(),
            solidifier.clone(),
            store.clone(),
            tips.clone(),
            milestones.clone(),
            &config,
        ));
        let router = NeighborRouter::bind(
            config.clone(),
            pipeline.clone(),
            milestones.clone(),
            snapshot,
        )
        .await?;
        let neighbors: Arc<dyn NeighborDirectory> = router.clone();

        let worker = TransactionRequesterWorker::new(
            gossiper.clone(),
            store.clone(),
            tips,
            neighbors.clone(),
            &config,
        );
        let tips_requester = TipsRequester::new(
            gossiper.clone(),
            store,
            milestones,
            neighbors.clone(),
            pipeline.clone(),
            solidifier.clone(),
            &config,
        );
        let broadcaster =
            TransactionBroadcaster::new(gossiper, solidifier.clone(), pipeline.clone(), neighbors);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![ScheduledTask::from_handle(
            "neighbor-router",
            tokio::spawn(router.clone().run(shutdown_rx.clone())),
        )];

        let intake = pipeline.clone();
        tasks.push(spawn_periodic(
            "processing-pipeline",
            PIPELINE_IDLE_DELAY,
            Some(pipeline.wakeup()),
            shutdown_rx.clone(),
            move || {
                intake.process_queues();
                Ok(())
            },
        ));

        let solidify = solidifier.clone();
        tasks.push(spawn_periodic(
            "solidifier",
            Duration::from_millis(config.solidifier_interval_ms),
            Some(solidifier.wakeup()),
            shutdown_rx.clone(),
            move || {
                solidify.process_transactions_to_solidify();
                Ok(())
            },
        ));

        tasks.push(spawn_periodic(
            "requester-worker",
            Duration::from_millis(config.requester_interval_ms),
            None,
            shutdown_rx.clone(),
            move || worker.process_request_queue().map(drop),
        ));

        tasks.push(spawn_periodic(
            "tips-requester",
            Duration::from_millis(config.tips_interval_ms),
            None,
            shutdown_rx.clone(),
            move || tips_requester.request_tips().map(drop),
        ));

        tasks.push(spawn_periodic(
            "broadcaster",
            Duration::from_millis(config.broadcast_interval_ms),
            None,
            shutdown_rx,
            move || {
                broadcaster.broadcast();
                Ok(())
            },
        ));

        info!(
            local_addr = %router.local_addr(),
            tasks = tasks.len(),
            "gossip node started"
        );

        Ok(Self {
            router,
            requester,
            solidifier,
            pipeline,
            shutdown_tx,
            tasks,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.router.local_addr()
    }

    pub fn router(&self) -> &Arc<NeighborRouter> {
        &self.router
    }

    pub fn requester(&self) -> &Arc<TransactionRequester> {
        &self.requester
    }

    pub fn solidifier(&self) -> &Arc<TransactionSolidifier> {
        &self.solidifier
    }

    pub fn pipeline(&self) -> &Arc<TransactionProcessingPipeline> {
        &self.pipeline
    }

    pub fn connected_neighbors(&self) -> Vec<NeighborHandle> {
        self.router.connected_neighbors()
    }

    /// Signals every task and waits up to the grace period for each.
    pub async fn shutdown(self) {
        info!("shutting down gossip node");
        // receivers outlive the send only if a task already ended, which is fine
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            task.join(self.shutdown_grace).await;
        }
        info!("gossip node stopped");
    }
}
