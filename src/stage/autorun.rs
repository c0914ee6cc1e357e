use super::election::is_controller;
use super::{millis, until, StageOperator, StepError, TimerKind};
use crate::store::{self, paths, StoreError};
use crate::types::*;
use serde_json::{json, Map};

impl StageOperator {
    /// Keep the between-rounds countdown in line with director and session.
    ///
    /// Runs after every director or session change. An existing future `nextStartsAt`
    /// is kept, so repeated evaluation never shortens or restarts a countdown.
    pub(super) async fn evaluate_auto_run(&mut self) -> Result<(), StoreError> {
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        let now = self.clock.now_ms();

        let driving = director.mode == DirectorMode::Normal
            && session.state == SessionState::Waiting
            && self.election.fence().is_some()
            && is_controller(&session, self.election.instance_id());

        if !(driving && director.auto_run) {
            self.timers.cancel(TimerKind::AutoStart);
            self.auto_start_at = None;
            if driving && session.next_starts_at != 0 {
                // Auto-run was switched off mid-countdown
                let mut fields = Map::new();
                fields.insert("nextStartsAt".to_string(), json!(0));
                fields.insert("updatedAt".to_string(), json!(now));
                self.store.update(paths::SESSION, fields).await?;
                tracing::info!("Auto-run countdown cleared");
            }
            return Ok(());
        }

        let mut next_starts_at = session.next_starts_at;
        if next_starts_at <= now {
            next_starts_at = now + millis(self.config.wait_duration);
            let mut fields = Map::new();
            fields.insert("nextStartsAt".to_string(), json!(next_starts_at));
            fields.insert("endsAt".to_string(), json!(0));
            fields.insert("updatedAt".to_string(), json!(now));
            self.store.update(paths::SESSION, fields).await?;
            tracing::info!(
                round_id = session.round_id,
                next_starts_at,
                "Auto-run countdown started"
            );
        }

        if self.timers.is_armed(TimerKind::AutoStart) && self.auto_start_at == Some(next_starts_at)
        {
            return Ok(());
        }
        self.timers
            .arm(TimerKind::AutoStart, until(next_starts_at, now));
        self.auto_start_at = Some(next_starts_at);
        Ok(())
    }

    /// Auto-start timer fired
    pub(super) async fn auto_start(&mut self) -> Result<(), StoreError> {
        self.auto_start_at = None;
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        if !director.auto_run {
            return Ok(());
        }
        if !self.election.holds(&*self.store).await? {
            tracing::warn!("Dropping auto-start timer: controller lease no longer held");
            return Ok(());
        }

        match self.start_round(StartedBy::Auto).await {
            Ok(()) => Ok(()),
            Err(StepError::Rejected(rejection)) => {
                tracing::info!(%rejection, "Auto-start skipped");
                Ok(())
            }
            Err(StepError::Store(e)) => Err(e),
        }
    }
}
