//! Dispatcher: the scheduling loop.
//!
//! One tick is EVICTING -> DISCOVERING -> EVALUATING -> DISPATCHING -> PERSISTING, then
//! SLEEPING until the next. Sends run concurrently (bounded) during DISPATCHING and are all
//! joined before PERSISTING. Send tasks only return outcomes; the dispatcher owns the
//! registry and applies them one at a time, so campaign state is never shared.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::aggregator::{self, TickReport};
use crate::campaign::{Campaign, CampaignError, Outcome, ScheduleError};
use crate::eligibility::is_eligible;
use crate::peer::Peer;
use crate::registry::CampaignRegistry;
use crate::store::StoreError;

/// Default pause between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);
/// Default cap on concurrently running sends.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;

/// Enumerates nearby peers. Called once per tick.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<Peer>, DiscoveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Pushes one file to one peer. Refusal is an outcome, not an error.
#[async_trait]
pub trait Transfer: Send + Sync + 'static {
    async fn send(&self, peer: &Peer, media: &Path) -> Outcome;
}

/// Wall clock. The offset of `now` decides the time of day used for schedule windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let now = Local::now();
        now.with_timezone(now.offset())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evicting,
    Discovering,
    Evaluating,
    Dispatching,
    Persisting,
    Sleeping,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    pub max_concurrent_sends: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }
}

/// Eligible peers of one campaign for the current tick.
struct Batch {
    campaign: String,
    media: PathBuf,
    peers: Vec<Peer>,
}

/// Outcome of one send task, handed back to the dispatcher.
struct Completed {
    campaign: Arc<str>,
    peer: Peer,
    outcome: Outcome,
    at: DateTime<Utc>,
}

pub struct Dispatcher {
    registry: CampaignRegistry,
    discovery: Arc<dyn Discovery>,
    transfer: Arc<dyn Transfer>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    phase: Phase,
}

impl Dispatcher {
    pub fn new(
        registry: CampaignRegistry,
        discovery: Arc<dyn Discovery>,
        transfer: Arc<dyn Transfer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            discovery,
            transfer,
            clock: Arc::new(SystemClock),
            config,
            phase: Phase::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &CampaignRegistry {
        &self.registry
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        trace!(from = ?self.phase, to = ?phase, "dispatcher phase");
        self.phase = phase;
    }

    /// Run one full tick. Only a persistence failure is an error; it is fatal to the daemon.
    pub async fn tick(&mut self) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();
        let now = self.clock.now();

        self.enter(Phase::Evicting);
        report.evicted = self.evict(now.with_timezone(&Utc));

        self.enter(Phase::Discovering);
        let peers = match self.discovery.discover().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "discovery failed, no peers this tick");
                Vec::new()
            }
        };
        let peers = unique_peers(peers);
        report.peers = peers.len();

        self.enter(Phase::Evaluating);
        let batches = self.evaluate(&peers, &now, &mut report);

        self.enter(Phase::Dispatching);
        self.dispatch(batches, &mut report).await;

        self.enter(Phase::Persisting);
        self.registry.save()?;
        self.enter(Phase::Idle);

        if report.dispatched > 0 || report.skipped_campaigns > 0 {
            info!(
                peers = report.peers,
                dispatched = report.dispatched,
                accepted = report.accepted,
                refused = report.refused,
                failed = report.failed,
                skipped_campaigns = report.skipped_campaigns,
                "tick complete"
            );
        } else {
            debug!(peers = report.peers, evicted = report.evicted, "tick complete");
        }
        Ok(report)
    }

    /// Tick until `cancel` fires. Cancellation is honoured between ticks only, so sends in
    /// flight finish and their outcomes are saved before this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), StoreError> {
        info!(
            campaigns = self.registry.len(),
            interval_secs = self.config.tick_interval.as_secs(),
            max_concurrent_sends = self.config.max_concurrent_sends,
            "dispatcher started"
        );
        while !cancel.is_cancelled() {
            self.tick().await?;
            self.enter(Phase::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
            self.enter(Phase::Idle);
        }
        info!("dispatcher stopped");
        Ok(())
    }

    fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        for campaign in self.registry.campaigns_mut() {
            let ttl = campaign.cache_ttl();
            let n = campaign.dedup_cache.evict(now, ttl);
            if n > 0 {
                debug!(campaign = %campaign.id, evicted = n, "cooldowns expired");
            }
            evicted += n;
        }
        evicted
    }

    fn evaluate(
        &self,
        peers: &[Peer],
        now: &DateTime<FixedOffset>,
        report: &mut TickReport,
    ) -> Vec<Batch> {
        let mut batches = Vec::new();
        for campaign in self.registry.campaigns() {
            match eligible_peers(campaign, peers, now) {
                Ok(eligible) if eligible.is_empty() => {}
                Ok(eligible) => {
                    report.eligible += eligible.len();
                    batches.push(Batch {
                        campaign: campaign.id.clone(),
                        media: campaign.media_path.clone(),
                        peers: eligible,
                    });
                }
                Err(source) => {
                    let e = CampaignError::Schedule {
                        campaign: campaign.id.clone(),
                        source,
                    };
                    error!(error = %e, "skipping campaign this tick");
                    report.skipped_campaigns += 1;
                }
            }
        }
        batches
    }

    async fn dispatch(&mut self, batches: Vec<Batch>, report: &mut TickReport) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_sends.max(1)));
        let mut tasks = JoinSet::new();

        for batch in batches {
            if !media_exists(&batch.media).await {
                let e = CampaignError::MediaMissing {
                    campaign: batch.campaign,
                    path: batch.media,
                };
                error!(error = %e, "skipping campaign this tick");
                report.skipped_campaigns += 1;
                continue;
            }
            let campaign: Arc<str> = Arc::from(batch.campaign);
            let media = Arc::new(batch.media);
            for peer in batch.peers {
                let campaign = Arc::clone(&campaign);
                let media = Arc::clone(&media);
                let permits = Arc::clone(&permits);
                let transfer = Arc::clone(&self.transfer);
                let clock = Arc::clone(&self.clock);
                debug!(campaign = %campaign, peer = %peer.id, name = %peer.name, "dispatching push");
                tasks.spawn(async move {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await.ok();
                    let outcome = transfer.send(&peer, &media).await;
                    Completed {
                        campaign,
                        peer,
                        outcome,
                        at: clock.now().with_timezone(&Utc),
                    }
                });
                report.dispatched += 1;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => self.complete(done, report),
                Err(e) => {
                    report.lost += 1;
                    error!(error = %e, "send task died, outcome discarded");
                }
            }
        }
    }

    fn complete(&mut self, done: Completed, report: &mut TickReport) {
        let Some(campaign) = self.registry.get_mut(&done.campaign) else {
            return;
        };
        aggregator::apply(campaign, &done.peer, done.outcome, done.at);
        report.count(done.outcome);
        info!(
            campaign = %done.campaign,
            peer = %done.peer.id,
            name = %done.peer.name,
            outcome = %done.outcome,
            "push finished"
        );
    }
}

fn eligible_peers(
    campaign: &Campaign,
    peers: &[Peer],
    now: &DateTime<FixedOffset>,
) -> Result<Vec<Peer>, ScheduleError> {
    let mut out = Vec::new();
    for peer in peers {
        if is_eligible(campaign, peer, now)? {
            out.push(peer.clone());
        }
    }
    Ok(out)
}

/// First sighting of each identity wins; discovery order is kept.
fn unique_peers(peers: Vec<Peer>) -> Vec<Peer> {
    let mut seen = BTreeSet::new();
    let before = peers.len();
    let out: Vec<Peer> = peers
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect();
    if out.len() < before {
        debug!(dropped = before - out.len(), "duplicate peer identities in discovery result");
    }
    out
}

async fn media_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
