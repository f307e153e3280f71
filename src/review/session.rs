use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::services::{LogId, LogStore, NewLog, PlaceResolver, TripId, TripPlacement, UserId};
use crate::cluster::ClusterEngine;
use crate::config::SessionConfig;
use crate::error::{ServiceError, SessionError};
use crate::state::data::{ClusterId, PhotoAssetRef, PhotoCluster, PlaceCandidate};

/// Where a review session is in its lifecycle.
///
/// Linear except that `Saving` may fall back to `Reviewing` when nothing
/// could be written. Progress values are fractions in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewSessionState {
    Selecting,
    Extracting(f64),
    Clustering,
    Resolving(f64),
    Reviewing,
    Saving(f64),
    Complete(usize),
    Failed(String),
}

impl ReviewSessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::Extracting(_) => "extracting",
            Self::Clustering => "clustering",
            Self::Resolving(_) => "resolving",
            Self::Reviewing => "reviewing",
            Self::Saving(_) => "saving",
            Self::Complete(_) => "complete",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(_))
    }

    fn can_move_to(&self, next: &Self) -> bool {
        use ReviewSessionState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed(_))
                | (Selecting, Extracting(_))
                | (Extracting(_), Extracting(_) | Clustering)
                | (Clustering, Resolving(_))
                | (Resolving(_), Resolving(_) | Reviewing)
                | (Reviewing, Saving(_))
                | (Saving(_), Saving(_) | Reviewing | Complete(_))
        )
    }
}

/// Outcome of one `save_all_logs` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
    /// Logs written, in review-list order
    pub logs: Vec<LogId>,
    /// Ready clusters whose commit failed; they stay in the engine
    pub failed: Vec<ClusterId>,
}

impl SaveReport {
    pub fn written(&self) -> usize {
        self.logs.len()
    }
}

/// Drives one review: seeding, place resolution, interactive edits through
/// the [`ClusterEngine`], and the final commit of ready clusters as logs.
pub struct ReviewSession {
    state: watch::Sender<ReviewSessionState>,
    engine: ClusterEngine,
    resolver: Arc<dyn PlaceResolver>,
    logs: Arc<dyn LogStore>,
}

impl ReviewSession {
    pub fn new(
        config: &SessionConfig,
        resolver: Arc<dyn PlaceResolver>,
        logs: Arc<dyn LogStore>,
    ) -> Self {
        let (state, _) = watch::channel(ReviewSessionState::Selecting);
        Self {
            state,
            engine: ClusterEngine::new(config),
            resolver,
            logs,
        }
    }

    pub fn state(&self) -> ReviewSessionState {
        self.state.borrow().clone()
    }

    /// Watch state and progress changes
    pub fn subscribe(&self) -> watch::Receiver<ReviewSessionState> {
        self.state.subscribe()
    }

    pub fn engine(&self) -> &ClusterEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ClusterEngine {
        &mut self.engine
    }

    fn set_state(&self, next: ReviewSessionState) -> Result<(), SessionError> {
        let current = self.state();
        if !current.can_move_to(&next) {
            return Err(SessionError::InvalidTransition {
                from: current.name(),
                to: next.name(),
            });
        }

        if current.name() != next.name() {
            info!(from = current.name(), to = next.name(), "Review session state changed");
        }
        self.state.send_replace(next);
        Ok(())
    }

    /// Abort the whole session. No-op once terminal.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state.borrow().is_terminal() {
            return;
        }
        warn!(%reason, "Review session failed");
        self.state.send_replace(ReviewSessionState::Failed(reason));
    }

    pub fn begin_extraction(&self) -> Result<(), SessionError> {
        self.set_state(ReviewSessionState::Extracting(0.0))
    }

    pub fn report_extraction_progress(&self, progress: f64) -> Result<(), SessionError> {
        self.set_state(ReviewSessionState::Extracting(progress.clamp(0.0, 1.0)))
    }

    pub fn begin_clustering(&self) -> Result<(), SessionError> {
        self.set_state(ReviewSessionState::Clustering)
    }

    /// Hand the upstream grouping to the engine. Only valid while clustering.
    pub fn load_clusters(
        &mut self,
        groups: Vec<Vec<PhotoAssetRef>>,
        unlocated: Vec<PhotoAssetRef>,
    ) -> Result<usize, SessionError> {
        let current = self.state();
        if current != ReviewSessionState::Clustering {
            return Err(SessionError::InvalidTransition {
                from: current.name(),
                to: "clustering",
            });
        }
        Ok(self.engine.seed(groups, unlocated))
    }

    /// Ask the place resolver for suggestions around every cluster centroid,
    /// then enter review. Resolver failures leave that cluster without
    /// suggestions.
    pub async fn resolve_places(&mut self) -> Result<(), SessionError> {
        self.set_state(ReviewSessionState::Resolving(0.0))?;

        let targets: Vec<_> = self
            .engine
            .clusters()
            .iter()
            .map(|c| (c.id, c.centroid))
            .collect();
        let total = targets.len();

        for (done, (id, centroid)) in targets.into_iter().enumerate() {
            if let Some(centroid) = centroid {
                match self.resolver.resolve(centroid, None).await {
                    Ok(places) => {
                        debug!(cluster_id = %id, candidates = places.len(), "Resolved places");
                        self.engine.set_suggestions(id, places);
                    }
                    Err(e) => warn!(cluster_id = %id, error = %e, "Place resolution failed"),
                }
            }
            self.set_state(ReviewSessionState::Resolving((done + 1) as f64 / total as f64))?;
        }

        self.set_state(ReviewSessionState::Reviewing)
    }

    /// Free-text place search around a cluster's centroid.
    /// Empty when the cluster is unknown, unlocated, or the lookup fails.
    pub async fn search_places(&self, cluster: ClusterId, text: &str) -> Vec<PlaceCandidate> {
        let Some(centroid) = self.engine.cluster(cluster).and_then(|c| c.centroid) else {
            return Vec::new();
        };
        match self.resolver.resolve(centroid, Some(text)).await {
            Ok(places) => places,
            Err(e) => {
                warn!(cluster_id = %cluster, error = %e, "Place search failed");
                Vec::new()
            }
        }
    }

    /// At least one cluster has a place (confirmed or suggested) and a rating
    pub fn can_save(&self) -> bool {
        self.engine.clusters().iter().any(PhotoCluster::is_ready)
    }

    pub fn ready_count(&self) -> usize {
        self.engine.clusters().iter().filter(|c| c.is_ready()).count()
    }

    /// Commit every ready cluster as a log, in review-list order.
    ///
    /// A failed cluster does not stop the others. With a trip, each written
    /// log takes the next sort key after the trip's current maximum. Written
    /// clusters leave the engine. The session ends in `Complete(n)` when at
    /// least one log was written and returns to `Reviewing` when none was.
    /// A missing user fails the whole session; unreadable trip sort keys
    /// return it to `Reviewing` with nothing written.
    pub async fn save_all_logs(
        &mut self,
        user: Option<UserId>,
        trip: Option<TripId>,
    ) -> Result<SaveReport, SessionError> {
        let current = self.state();
        if current != ReviewSessionState::Reviewing {
            return Err(SessionError::NotReviewing(current.name()));
        }

        let mut report = SaveReport::default();
        let Some(user) = user else {
            self.fail("no resolvable user");
            return Ok(report);
        };

        let ready: Vec<ClusterId> = self
            .engine
            .clusters()
            .iter()
            .filter(|c| c.is_ready())
            .map(|c| c.id)
            .collect();
        if ready.is_empty() {
            debug!("Nothing ready to save");
            return Ok(report);
        }

        self.set_state(ReviewSessionState::Saving(0.0))?;

        let mut next_key = match &trip {
            Some(trip) => match self.logs.max_sort_key(trip).await {
                Ok(max) => Some(max.map_or(0, |k| k + 1)),
                Err(e) => {
                    warn!(error = %e, "Could not read trip sort keys");
                    self.set_state(ReviewSessionState::Reviewing)?;
                    return Err(SessionError::SortKeys(e.to_string()));
                }
            },
            None => None,
        };

        let total = ready.len();
        for (done, id) in ready.iter().enumerate() {
            let placement = trip.clone().zip(next_key).map(|(trip, sort_key)| TripPlacement {
                trip,
                sort_key,
            });

            let result = match self.engine.cluster(*id) {
                Some(cluster) => commit_cluster(self.logs.as_ref(), cluster, &user, placement).await,
                None => Err(ServiceError::Persist("cluster vanished during save".into())),
            };

            match result {
                Ok(log_id) => {
                    debug!(cluster_id = %id, log_id = %log_id, "Committed cluster");
                    report.logs.push(log_id);
                    if let Some(key) = next_key.as_mut() {
                        *key += 1;
                    }
                }
                Err(e) => {
                    warn!(cluster_id = %id, error = %e, "Skipping cluster that failed to save");
                    report.failed.push(*id);
                }
            }

            self.set_state(ReviewSessionState::Saving((done + 1) as f64 / total as f64))?;
        }

        for id in ready.iter().filter(|id| !report.failed.contains(id)) {
            self.engine.take_cluster(*id);
        }

        if report.logs.is_empty() {
            self.set_state(ReviewSessionState::Reviewing)?;
        } else {
            info!(written = report.written(), failed = report.failed.len(), "✅ Logs saved");
            self.set_state(ReviewSessionState::Complete(report.written()))?;
        }
        Ok(report)
    }
}

async fn commit_cluster(
    logs: &dyn LogStore,
    cluster: &PhotoCluster,
    user: &UserId,
    trip: Option<TripPlacement>,
) -> Result<LogId, ServiceError> {
    let candidate = cluster
        .effective_place()
        .ok_or_else(|| ServiceError::Persist("cluster has no place".into()))?;
    let rating = cluster
        .rating
        .ok_or_else(|| ServiceError::Persist("cluster has no rating".into()))?;

    let place = logs.materialize_place(candidate).await?;
    logs.create_log(NewLog {
        user: user.clone(),
        place,
        rating,
        photo_ids: cluster.photos.iter().map(|p| p.asset_id.clone()).collect(),
        trip,
    })
    .await
}
