//! The stage operator: owns the round state machine for one stage instance.
//!
//! Each operator is a single task running an event loop over operator commands,
//! store notifications, timer expiries and the lease heartbeat. Only the instance
//! holding the controller lease drives timer transitions.

mod actions;
mod autorun;
pub mod election;
mod round;
mod timers;

pub use timers::TimerKind;

use crate::clock::{Clock, Millis};
use crate::config::ShowConfig;
use crate::store::{self, paths, Notification, SharedStore, StoreError};
use crate::types::*;
use election::{ClaimOutcome, Election};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use timers::Timers;
use tokio::sync::{mpsc, oneshot};

/// Instance id of the operator the server runs in embedded mode
pub const HOUSE_INSTANCE_ID: &str = "house";

const EVENT_BUFFER: usize = 64;

/// Generate an id for a stage console that has none persisted yet
pub fn new_instance_id() -> InstanceId {
    format!("stg-{}", ulid::Ulid::new().to_string().to_lowercase())
}

/// Manual actions exposed on the stage console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorAction {
    StartRound,
    SetAutoRun { enabled: bool },
    Freeze,
    Blackout,
    Resume,
    ResetVotes,
    Restart,
}

/// Why an operator action was a no-op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Another instance is controller ({holder})")]
    NotController { holder: InstanceId },

    #[error("Director mode is {mode:?}")]
    ModeNotNormal { mode: DirectorMode },

    #[error("Not allowed while session is {state:?}")]
    WrongState { state: SessionState },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotController { .. } => "NOT_CONTROLLER",
            Rejection::ModeNotNormal { .. } => "MODE_NOT_NORMAL",
            Rejection::WrongState { .. } => "WRONG_STATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    Rejected { rejection: Rejection },
    Failed { message: String },
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) enum Event {
    Action {
        action: OperatorAction,
        reply: oneshot::Sender<ActionOutcome>,
    },
    TimerFired {
        kind: TimerKind,
        epoch: u64,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle for sending commands to a running operator
#[derive(Clone)]
pub struct StageHandle {
    instance_id: InstanceId,
    events: mpsc::Sender<Event>,
}

impl StageHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run one operator action and wait for its outcome
    pub async fn dispatch(&self, action: OperatorAction) -> ActionOutcome {
        let stopped = || ActionOutcome::Failed {
            message: "Stage operator has stopped".to_string(),
        };

        let (reply, rx) = oneshot::channel();
        if self
            .events
            .send(Event::Action { action, reply })
            .await
            .is_err()
        {
            return stopped();
        }
        rx.await.unwrap_or_else(|_| stopped())
    }

    /// Stop the operator, releasing the controller lease if held
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.events.send(Event::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct StageOperator {
    store: Arc<dyn SharedStore>,
    config: Arc<ShowConfig>,
    clock: Clock,
    election: Election,
    timers: Timers,
    /// Deadline the armed auto-start timer was set for
    auto_start_at: Option<Millis>,
}

impl StageOperator {
    /// Start an operator task for `instance_id` and return its handle
    pub fn spawn(
        store: Arc<dyn SharedStore>,
        config: Arc<ShowConfig>,
        clock: Clock,
        instance_id: InstanceId,
    ) -> StageHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let operator = StageOperator {
            election: Election::new(instance_id.clone(), config.lease_ttl),
            timers: Timers::new(tx.downgrade()),
            auto_start_at: None,
            store,
            config,
            clock,
        };
        tokio::spawn(operator.run(rx));

        StageHandle {
            instance_id,
            events: tx,
        }
    }

    fn instance_id(&self) -> InstanceId {
        self.election.instance_id().to_string()
    }

    async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let mut director_changes = self.store.subscribe(paths::DIRECTOR);
        let mut session_changes = self.store.subscribe(paths::SESSION);
        let mut lease_changes = self.store.subscribe(paths::CONTROLLER);

        self.boot().await;

        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Action { action, reply }) => {
                        let outcome = self.apply(action).await;
                        let _ = reply.send(outcome);
                    }
                    Some(Event::TimerFired { kind, epoch }) => {
                        if self.timers.take_fired(kind, epoch) {
                            self.on_timer(kind).await;
                        } else {
                            tracing::debug!(?kind, epoch, "Ignoring stale timer");
                        }
                    }
                    Some(Event::Shutdown { done }) => {
                        self.stop().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(notification) = director_changes.recv() => self.on_record_change(notification).await,
                Some(notification) = session_changes.recv() => self.on_record_change(notification).await,
                Some(notification) = lease_changes.recv() => self.on_lease_change(notification).await,
                _ = heartbeat.tick() => self.heartbeat().await,
            }
        }
    }

    /// Seed missing records, then try to become controller
    async fn boot(&mut self) {
        let now = self.clock.now_ms();
        let defaults = [
            (paths::DIRECTOR, serde_json::to_value(Director::default())),
            (paths::WORLD, serde_json::to_value(World::reset(now))),
            (
                paths::SESSION,
                serde_json::to_value(Session::waiting(0, String::new(), now)),
            ),
        ];
        for (path, value) in defaults {
            let seeded = match value {
                Ok(value) => self.store.compare_and_swap(path, None, value).await,
                Err(e) => Err(e.into()),
            };
            match seeded {
                Ok(true) => tracing::debug!(path, "Seeded default record"),
                Ok(false) => {}
                Err(e) => tracing::warn!(path, "Failed to seed record: {}", e),
            }
        }

        match self.election.claim(&*self.store, now).await {
            Ok(ClaimOutcome::Standby { holder }) => {
                tracing::info!(instance = %self.election.instance_id(), %holder, "Booted as standby");
            }
            Ok(_) => {
                let result = self.recover().await;
                self.log_failure("recover", result);
            }
            Err(e) => tracing::warn!("Controller claim failed at boot: {}", e),
        }
    }

    async fn stop(&mut self) {
        self.timers.cancel_all();
        if let Err(e) = self.election.release(&*self.store).await {
            tracing::warn!("Failed to release controller lease: {}", e);
        }
        tracing::info!(instance = %self.election.instance_id(), "Stage operator stopped");
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        let result = match kind {
            TimerKind::Lock => self.lock_round().await,
            TimerKind::Unlock => self.unlock_round().await,
            TimerKind::AutoStart => self.auto_start().await,
        };
        self.log_failure("timer", result);
    }

    async fn on_record_change(&mut self, notification: Notification) {
        // A replaced tree (snapshot import) or a missed change needs the full recovery pass
        let wholesale = match &notification {
            Notification::Changed(change) => change.path.is_empty(),
            Notification::Lagged(_) => true,
        };
        if wholesale && self.election.fence().is_some() {
            let result = self.recover().await;
            self.log_failure("recover", result);
        } else {
            self.reconcile().await;
        }
    }

    /// Re-derive local timers after a director or session change
    async fn reconcile(&mut self) {
        let director: Director = match store::read_or_default(&*self.store, paths::DIRECTOR).await
        {
            Ok(director) => director,
            Err(e) => {
                tracing::warn!("Failed to read director: {}", e);
                return;
            }
        };
        if director.mode != DirectorMode::Normal {
            self.timers.cancel_all();
            return;
        }
        let result = self.evaluate_auto_run().await;
        self.log_failure("auto-run", result);
    }

    async fn on_lease_change(&mut self, notification: Notification) {
        if let Notification::Lagged(missed) = notification {
            tracing::debug!(missed, "Lease subscription lagged, re-reading");
        }
        // Queued notifications can predate our own claim, so judge the current record
        let lease = match self.store.get(paths::CONTROLLER).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to re-read controller lease: {}", e);
                return;
            }
        };
        let lease = election::decode_lease(lease.as_ref());
        if self.election.observe(lease.as_ref()) {
            tracing::warn!(
                instance = %self.election.instance_id(),
                holder = ?lease.map(|l| l.holder),
                "Demoted: controller lease taken by another instance"
            );
            self.timers.cancel_all();
        }
    }

    async fn heartbeat(&mut self) {
        let was_controller = self.election.fence().is_some();
        match self.election.claim(&*self.store, self.clock.now_ms()).await {
            Ok(ClaimOutcome::Acquired { fence }) => {
                tracing::info!(fence, "Took over as controller, recovering session");
                let result = self.recover().await;
                self.log_failure("recover", result);
            }
            Ok(ClaimOutcome::Renewed) => {}
            Ok(ClaimOutcome::Standby { holder }) => {
                if was_controller {
                    tracing::warn!(%holder, "Lost controller lease");
                    self.timers.cancel_all();
                }
            }
            Err(e) => tracing::warn!("Lease heartbeat failed: {}", e),
        }
    }

    fn log_failure(&self, step: &str, result: Result<(), StoreError>) {
        if let Err(e) = result {
            tracing::warn!(instance = %self.election.instance_id(), step, "Store write failed: {}", e);
        }
    }
}

fn millis(duration: Duration) -> Millis {
    duration.as_millis() as Millis
}

/// Time left until `deadline`, zero if it already passed
fn until(deadline: Millis, now: Millis) -> Duration {
    Duration::from_millis((deadline - now).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    const T0: Millis = 1_700_000_000_000;

    struct Show {
        store: Arc<MemoryStore>,
        clock: Clock,
        config: Arc<ShowConfig>,
    }

    impl Show {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Clock::starting_at(T0),
                config: Arc::new(ShowConfig::default()),
            }
        }

        async fn operator(&self, id: &str) -> StageHandle {
            let handle = StageOperator::spawn(
                self.store.clone(),
                self.config.clone(),
                self.clock,
                id.to_string(),
            );
            settle().await;
            handle
        }

        async fn session(&self) -> Session {
            store::read_or_default(&*self.store, paths::SESSION)
                .await
                .unwrap()
        }

        async fn world(&self) -> World {
            store::read_or_default(&*self.store, paths::WORLD)
                .await
                .unwrap()
        }

        async fn director(&self) -> Director {
            store::read_or_default(&*self.store, paths::DIRECTOR)
                .await
                .unwrap()
        }

        async fn vote(&self, round_id: RoundId, vote_type: VoteType, kind: VoteKind, device: &str) {
            let entry = VoteEntry {
                vote_type,
                power: kind.power(),
                kind,
                role: AudienceRole::Observer,
                device_id: device.to_string(),
                ts: self.clock.now_ms(),
            };
            self.store
                .push(
                    &paths::round_votes(round_id),
                    serde_json::to_value(entry).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    /// Let spawned tasks drain their queues without moving far in time
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn wait(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_seeds_records_and_claims() {
        let show = Show::new();
        let _stage = show.operator("stage-a").await;

        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(session.round_id, 0);
        assert_eq!(session.controller_id, "stage-a");
        assert_eq!(show.world().await.stability, DEFAULT_STABILITY);
        assert_eq!(show.director().await, Director::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_round_cycle() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        assert_eq!(
            stage.dispatch(OperatorAction::StartRound).await,
            ActionOutcome::Applied
        );
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.round_id, 1);
        assert_eq!(session.started_by, Some(StartedBy::Manual));
        assert_eq!(
            session.ends_at,
            show.clock.now_ms() + millis(show.config.active_duration)
        );

        for device in ["a", "b", "c", "d"] {
            show.vote(1, VoteType::Stable, VoteKind::Normal, device).await;
        }
        for device in ["e", "f"] {
            show.vote(1, VoteType::Override, VoteKind::Ability, device).await;
        }

        wait(21).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Locked);
        assert_eq!(session.round_id, 1);

        let world = show.world().await;
        assert_eq!(world.stability, 56);
        assert_eq!(world.dominant, VoteType::Override);
        assert_eq!(world.last_delta, -14);
        assert_eq!(world.round_id, 1);
        assert_eq!(world.last_scores.total(), 10);

        wait(6).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(session.round_id, 1);
        assert_eq!(session.ends_at, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_vote_round_still_writes_world() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        wait(21).await;

        let world = show.world().await;
        assert_eq!(world.round_id, 1);
        assert_eq!(world.stability, 70);
        assert_eq!(world.last_delta, 0);
        assert_eq!(world.dominant, VoteType::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_round_clears_stale_next_round_votes() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        // Orphans left over from a restart race
        show.vote(1, VoteType::Glitch, VoteKind::Ability, "ghost").await;

        stage.dispatch(OperatorAction::StartRound).await;
        assert!(store::read_round_votes(&*show.store, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_round_rejected_while_frozen() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::Freeze).await;
        let before = show.session().await;

        for _ in 0..2 {
            let outcome = stage.dispatch(OperatorAction::StartRound).await;
            assert_eq!(
                outcome,
                ActionOutcome::Rejected {
                    rejection: Rejection::ModeNotNormal {
                        mode: DirectorMode::Freeze
                    }
                }
            );
        }
        assert_eq!(show.session().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_round_rejected_while_active() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        let outcome = stage.dispatch(OperatorAction::StartRound).await;

        assert_eq!(
            outcome,
            ActionOutcome::Rejected {
                rejection: Rejection::WrongState {
                    state: SessionState::Active
                }
            }
        );
        assert_eq!(show.session().await.round_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_round_allowed_from_locked() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        wait(21).await;
        assert_eq!(show.session().await.state, SessionState::Locked);

        assert_eq!(
            stage.dispatch(OperatorAction::StartRound).await,
            ActionOutcome::Applied
        );
        // The pending unlock must not knock the new round back to waiting
        wait(7).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.round_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freeze_during_active_cancels_lock() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        show.vote(1, VoteType::Glitch, VoteKind::Ability, "d1").await;

        assert_eq!(
            stage.dispatch(OperatorAction::Freeze).await,
            ActionOutcome::Applied
        );
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Frozen);
        assert_eq!(session.ends_at, 0);
        assert_eq!(session.next_starts_at, 0);

        wait(30).await;
        let world = show.world().await;
        assert_eq!(world.round_id, 0);
        assert_eq!(world.stability, 70);
        assert_eq!(show.session().await.state, SessionState::Frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blackout_then_resume() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        stage.dispatch(OperatorAction::Blackout).await;
        assert_eq!(show.director().await.mode, DirectorMode::Blackout);

        assert_eq!(
            stage.dispatch(OperatorAction::Resume).await,
            ActionOutcome::Applied
        );
        assert_eq!(show.director().await.mode, DirectorMode::Normal);
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(session.round_id, 1);
        assert_eq!(session.ends_at, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rejected_when_nothing_to_resume() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        let outcome = stage.dispatch(OperatorAction::Resume).await;
        assert!(matches!(
            outcome,
            ActionOutcome::Rejected {
                rejection: Rejection::WrongState { .. }
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_paces_rounds() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: true })
            .await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(
            session.next_starts_at,
            show.clock.now_ms() + millis(show.config.wait_duration)
        );

        wait(9).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.started_by, Some(StartedBy::Auto));
        assert_eq!(session.next_starts_at, 0);

        // Active 20s, locked 6s, then a fresh countdown
        wait(27).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert!(session.next_starts_at > show.clock.now_ms());

        wait(8).await;
        assert_eq!(show.session().await.round_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_toggle_is_idempotent() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: true })
            .await;
        let first = show.session().await.next_starts_at;

        wait(3).await;
        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: true })
            .await;
        assert_eq!(show.session().await.next_starts_at, first);

        // Fires at the original deadline, not 8s after the second toggle
        tokio::time::sleep(until(first, show.clock.now_ms()) + Duration::from_millis(10)).await;
        assert_eq!(show.session().await.state, SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_off_cancels_countdown() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: true })
            .await;
        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: false })
            .await;
        settle().await;
        assert_eq!(show.session().await.next_starts_at, 0);

        wait(20).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(session.round_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_votes_clears_current_round() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage.dispatch(OperatorAction::StartRound).await;
        show.vote(1, VoteType::Glitch, VoteKind::Normal, "d1").await;
        stage.dispatch(OperatorAction::ResetVotes).await;

        assert!(store::read_round_votes(&*show.store, 1)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(show.session().await.state, SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_show() {
        let show = Show::new();
        let stage = show.operator("stage-a").await;

        stage
            .dispatch(OperatorAction::SetAutoRun { enabled: true })
            .await;
        stage.dispatch(OperatorAction::StartRound).await;
        show.vote(1, VoteType::Glitch, VoteKind::Ability, "d1").await;
        wait(21).await;
        assert_eq!(show.world().await.stability, 64);
        stage.dispatch(OperatorAction::Freeze).await;

        assert_eq!(
            stage.dispatch(OperatorAction::Restart).await,
            ActionOutcome::Applied
        );

        let session = show.session().await;
        assert_eq!(session.state, SessionState::Waiting);
        assert_eq!(session.round_id, 0);
        assert_eq!(session.controller_id, "stage-a");
        let world = show.world().await;
        assert_eq!(world.stability, 70);
        assert_eq!(world.dominant, VoteType::Stable);
        assert_eq!(show.store.get(paths::VOTES).await.unwrap(), None);
        assert_eq!(
            show.director().await,
            Director {
                mode: DirectorMode::Normal,
                auto_run: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_instance_cannot_start() {
        let show = Show::new();
        let _a = show.operator("stage-a").await;
        let b = show.operator("stage-b").await;

        let outcome = b.dispatch(OperatorAction::StartRound).await;
        assert_eq!(
            outcome,
            ActionOutcome::Rejected {
                rejection: Rejection::NotController {
                    holder: "stage-a".to_string()
                }
            }
        );
        assert_eq!(show.session().await.round_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_takes_over_after_release() {
        let show = Show::new();
        let a = show.operator("stage-a").await;
        let b = show.operator("stage-b").await;

        a.shutdown().await;
        wait(3).await;

        assert_eq!(show.session().await.controller_id, "stage-b");
        assert_eq!(
            b.dispatch(OperatorAction::StartRound).await,
            ActionOutcome::Applied
        );
        assert_eq!(
            a.dispatch(OperatorAction::StartRound).await,
            ActionOutcome::Failed {
                message: "Stage operator has stopped".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeover_recovers_stranded_round() {
        let show = Show::new();
        let now = show.clock.now_ms();

        // A controller that crashed mid-round: lease still live, round still active
        let session = Session::active(4, now + 5_000, StartedBy::Auto, "ghost".to_string(), now);
        store::write(&*show.store, paths::SESSION, &session)
            .await
            .unwrap();
        show.store
            .set(
                paths::CONTROLLER,
                json!({"holder": "ghost", "fence": 3, "expiresAt": now + 2_000}),
            )
            .await
            .unwrap();
        show.vote(4, VoteType::Stable, VoteKind::Normal, "d1").await;

        let _b = show.operator("stage-b").await;
        assert_eq!(show.session().await.controller_id, "ghost");

        wait(6).await;
        let session = show.session().await;
        assert_eq!(session.state, SessionState::Locked);
        assert_eq!(session.controller_id, "stage-b");
        let world = show.world().await;
        assert_eq!(world.round_id, 4);
        assert_eq!(world.stability, 71);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demoted_controller_timer_is_fenced() {
        let show = Show::new();
        let a = show.operator("stage-a").await;
        a.dispatch(OperatorAction::StartRound).await;

        // Another instance forces the lease away with a higher token
        show.store
            .set(
                paths::CONTROLLER,
                json!({"holder": "intruder", "fence": 99, "expiresAt": show.clock.now_ms() + 600_000}),
            )
            .await
            .unwrap();

        wait(25).await;
        assert_eq!(show.session().await.state, SessionState::Active);
        assert_eq!(show.world().await.round_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reclaims_controller() {
        let show = Show::new();
        let _a = show.operator("stage-a").await;
        let b = show.operator("stage-b").await;

        assert_eq!(
            b.dispatch(OperatorAction::Restart).await,
            ActionOutcome::Applied
        );
        assert_eq!(show.session().await.controller_id, "stage-b");
        assert_eq!(
            b.dispatch(OperatorAction::StartRound).await,
            ActionOutcome::Applied
        );
    }

    #[test]
    fn test_operator_action_wire_format() {
        let action: OperatorAction =
            serde_json::from_str(r#"{"action":"set_auto_run","enabled":true}"#).unwrap();
        assert_eq!(action, OperatorAction::SetAutoRun { enabled: true });

        let outcome = ActionOutcome::Rejected {
            rejection: Rejection::ModeNotNormal {
                mode: DirectorMode::Blackout,
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["rejection"]["reason"], "mode_not_normal");
        assert_eq!(json["rejection"]["mode"], "blackout");
    }
}
