use super::{ActionOutcome, OperatorAction, Rejection, StageOperator, StepError};
use crate::store::{self, paths};
use crate::types::*;
use serde_json::{json, Map};

impl StageOperator {
    pub(super) async fn apply(&mut self, action: OperatorAction) -> ActionOutcome {
        tracing::info!(instance = %self.election.instance_id(), ?action, "Operator action");

        let result = match action {
            OperatorAction::StartRound => self.start_round(StartedBy::Manual).await,
            OperatorAction::SetAutoRun { enabled } => self.set_auto_run(enabled).await,
            OperatorAction::Freeze => self.halt(DirectorMode::Freeze).await,
            OperatorAction::Blackout => self.halt(DirectorMode::Blackout).await,
            OperatorAction::Resume => self.resume().await,
            OperatorAction::ResetVotes => self.reset_votes().await,
            OperatorAction::Restart => self.restart().await,
        };

        match result {
            Ok(()) => ActionOutcome::Applied,
            Err(StepError::Rejected(rejection)) => {
                tracing::info!(%rejection, "Operator action rejected");
                ActionOutcome::Rejected { rejection }
            }
            Err(StepError::Store(e)) => {
                tracing::warn!("Operator action failed: {}", e);
                ActionOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn set_auto_run(&mut self, enabled: bool) -> Result<(), StepError> {
        let mut fields = Map::new();
        fields.insert("autoRun".to_string(), json!(enabled));
        self.store.update(paths::DIRECTOR, fields).await?;
        self.evaluate_auto_run().await?;
        Ok(())
    }

    /// freeze / blackout: any state -> frozen
    async fn halt(&mut self, mode: DirectorMode) -> Result<(), StepError> {
        self.timers.cancel_all();
        self.auto_start_at = None;

        let now = self.clock.now_ms();
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;

        let mut fields = Map::new();
        fields.insert("mode".to_string(), json!(mode));
        self.store.update(paths::DIRECTOR, fields).await?;
        store::write(&*self.store, paths::SESSION, &session.frozen(now)).await?;

        tracing::info!(?mode, round_id = session.round_id, "Show halted");
        Ok(())
    }

    /// frozen -> waiting; the resuming instance becomes controller
    async fn resume(&mut self) -> Result<(), StepError> {
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        if director.mode == DirectorMode::Normal && session.state != SessionState::Frozen {
            return Err(Rejection::WrongState {
                state: session.state,
            }
            .into());
        }

        let now = self.clock.now_ms();
        self.election.force_claim(&*self.store, now).await?;

        let mut fields = Map::new();
        fields.insert("mode".to_string(), json!(DirectorMode::Normal));
        self.store.update(paths::DIRECTOR, fields).await?;

        let next = Session::waiting(session.round_id, self.instance_id(), now);
        store::write(&*self.store, paths::SESSION, &next).await?;
        tracing::info!(round_id = session.round_id, "Show resumed");

        self.evaluate_auto_run().await?;
        Ok(())
    }

    async fn reset_votes(&mut self) -> Result<(), StepError> {
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        self.store
            .remove(&paths::round_votes(session.round_id))
            .await?;
        tracing::info!(round_id = session.round_id, "Votes reset");
        Ok(())
    }

    /// Full reset back to round 0, keeping only the auto-run toggle
    async fn restart(&mut self) -> Result<(), StepError> {
        self.timers.cancel_all();
        self.auto_start_at = None;

        let now = self.clock.now_ms();
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        self.election.force_claim(&*self.store, now).await?;

        self.store.remove(paths::VOTES).await?;
        store::write(&*self.store, paths::WORLD, &World::reset(now)).await?;
        let director = Director {
            mode: DirectorMode::Normal,
            auto_run: director.auto_run,
        };
        store::write(&*self.store, paths::DIRECTOR, &director).await?;
        store::write(
            &*self.store,
            paths::SESSION,
            &Session::waiting(0, self.instance_id(), now),
        )
        .await?;
        tracing::info!(auto_run = director.auto_run, "Show restarted");

        self.evaluate_auto_run().await?;
        Ok(())
    }
}
