use super::election::{is_controller, ClaimOutcome};
use super::{millis, until, Rejection, StageOperator, StepError, TimerKind};
use crate::clock::Millis;
use crate::store::{self, paths, StoreError};
use crate::tally::{apply_round, tally};
use crate::types::*;

impl StageOperator {
    /// The controller guard: the session names us (or nobody), and no other live
    /// instance holds the lease
    async fn may_drive(&mut self, session: &Session, now: Millis) -> Result<(), StepError> {
        if !is_controller(session, self.election.instance_id()) {
            return Err(Rejection::NotController {
                holder: session.controller_id.clone(),
            }
            .into());
        }
        if self.election.holds(&*self.store).await? {
            return Ok(());
        }
        match self.election.claim(&*self.store, now).await? {
            ClaimOutcome::Standby { holder } => Err(Rejection::NotController { holder }.into()),
            ClaimOutcome::Acquired { .. } | ClaimOutcome::Renewed => Ok(()),
        }
    }

    /// waiting|locked -> active
    pub(super) async fn start_round(&mut self, started_by: StartedBy) -> Result<(), StepError> {
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        if director.mode != DirectorMode::Normal {
            return Err(Rejection::ModeNotNormal {
                mode: director.mode,
            }
            .into());
        }

        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        if matches!(session.state, SessionState::Active | SessionState::Frozen) {
            return Err(Rejection::WrongState {
                state: session.state,
            }
            .into());
        }

        let now = self.clock.now_ms();
        self.may_drive(&session, now).await?;

        let round_id = session.round_id + 1;
        // Orphans from an earlier run of this round id must not be counted
        self.store.remove(&paths::round_votes(round_id)).await?;

        let ends_at = now + millis(self.config.active_duration);
        let next = Session::active(round_id, ends_at, started_by, self.instance_id(), now);
        store::write(&*self.store, paths::SESSION, &next).await?;

        self.timers.cancel(TimerKind::AutoStart);
        self.timers.cancel(TimerKind::Unlock);
        self.timers.arm(TimerKind::Lock, self.config.active_duration);

        tracing::info!(round_id, ?started_by, ends_at, "Round started");
        Ok(())
    }

    /// active -> locked: aggregate the ledger and apply it to the world
    pub(super) async fn lock_round(&mut self) -> Result<(), StoreError> {
        if !self.election.holds(&*self.store).await? {
            tracing::warn!("Dropping lock timer: controller lease no longer held");
            return Ok(());
        }
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        if director.mode != DirectorMode::Normal || session.state != SessionState::Active {
            tracing::debug!(state = ?session.state, mode = ?director.mode, "Lock timer no longer applies");
            return Ok(());
        }

        let now = self.clock.now_ms();
        let votes = store::read_round_votes(&*self.store, session.round_id).await?;
        let scores = tally(votes.iter().map(|(_, entry)| entry));

        let current: World = store::read_or_default(&*self.store, paths::WORLD).await?;
        let world = apply_round(&current, scores, session.round_id, now);
        store::write(&*self.store, paths::WORLD, &world).await?;

        let ends_at = now + millis(self.config.locked_duration);
        store::write(&*self.store, paths::SESSION, &session.locked(ends_at, now)).await?;
        self.timers.arm(TimerKind::Unlock, self.config.locked_duration);

        tracing::info!(
            round_id = session.round_id,
            votes = votes.len(),
            delta = world.last_delta,
            stability = world.stability,
            dominant = ?world.dominant,
            "Round locked"
        );
        Ok(())
    }

    /// locked -> waiting
    pub(super) async fn unlock_round(&mut self) -> Result<(), StoreError> {
        if !self.election.holds(&*self.store).await? {
            tracing::warn!("Dropping unlock timer: controller lease no longer held");
            return Ok(());
        }
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        if session.state != SessionState::Locked {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let next = Session::waiting(session.round_id, session.controller_id.clone(), now);
        store::write(&*self.store, paths::SESSION, &next).await?;
        tracing::info!(round_id = session.round_id, "Round unlocked");

        self.evaluate_auto_run().await
    }

    /// Pick up whatever the previous controller left in flight
    pub(super) async fn recover(&mut self) -> Result<(), StoreError> {
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let mut session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        let now = self.clock.now_ms();

        // An imported or stale session can name someone other than the lease holder
        if self.election.fence().is_some() && session.controller_id != self.election.instance_id() {
            tracing::info!(
                previous = %session.controller_id,
                "Reclaiming session for the lease holder"
            );
            self.election.mirror_into_session(&*self.store).await?;
            session.controller_id = self.instance_id();
        }

        if director.mode != DirectorMode::Normal {
            self.timers.cancel_all();
            if session.state != SessionState::Frozen {
                store::write(&*self.store, paths::SESSION, &session.frozen(now)).await?;
            }
            return Ok(());
        }

        match session.state {
            SessionState::Active if session.ends_at <= now => self.lock_round().await,
            SessionState::Active => {
                self.timers.arm(TimerKind::Lock, until(session.ends_at, now));
                tracing::info!(round_id = session.round_id, "Resumed lock countdown");
                Ok(())
            }
            SessionState::Locked if session.ends_at <= now => self.unlock_round().await,
            SessionState::Locked => {
                self.timers.arm(TimerKind::Unlock, until(session.ends_at, now));
                Ok(())
            }
            SessionState::Waiting => self.evaluate_auto_run().await,
            // Stays put until an operator resumes
            SessionState::Frozen => Ok(()),
        }
    }
}
