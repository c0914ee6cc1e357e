use crate::audience::VoteGate;
use crate::clock::Clock;
use crate::config::{ControllerMode, ShowConfig};
use crate::protocol::ShowState;
use crate::stage::{new_instance_id, StageHandle, StageOperator, HOUSE_INSTANCE_ID};
use crate::store::snapshot::StoreSnapshot;
use crate::store::{self, paths, MemoryStore, StoreError};
use crate::types::*;
use crate::view::ShowView;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stage console's connection to the operator that executes its commands
#[derive(Clone)]
pub struct StageLink {
    pub instance_id: InstanceId,
    pub handle: StageHandle,
}

struct ConsoleOperator {
    handle: StageHandle,
    connections: usize,
}

/// Shared application state
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub config: Arc<ShowConfig>,
    pub clock: Clock,
    pub controller: ControllerMode,
    pub votes: VoteGate,
    /// The server's own operator in embedded mode
    house: Option<StageHandle>,
    /// Per-instance operators in console mode, shared by reconnecting tabs
    consoles: Mutex<HashMap<InstanceId, ConsoleOperator>>,
}

impl AppState {
    /// Build the state and, in embedded mode, start the house operator.
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<MemoryStore>, config: Arc<ShowConfig>, controller: ControllerMode) -> Self {
        Self::with_clock(store, config, Clock::new(), controller)
    }

    pub fn with_clock(
        store: Arc<MemoryStore>,
        config: Arc<ShowConfig>,
        clock: Clock,
        controller: ControllerMode,
    ) -> Self {
        let house = match controller {
            ControllerMode::Embedded => Some(StageOperator::spawn(
                store.clone(),
                config.clone(),
                clock,
                HOUSE_INSTANCE_ID.to_string(),
            )),
            ControllerMode::Console => None,
        };
        let votes = VoteGate::new(store.clone(), clock, config.cooldown);

        Self {
            store,
            config,
            clock,
            controller,
            votes,
            house,
            consoles: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a stage connection to an operator
    pub async fn attach_stage(&self, instance_id: Option<InstanceId>) -> StageLink {
        if let Some(house) = &self.house {
            return StageLink {
                instance_id: house.instance_id().to_string(),
                handle: house.clone(),
            };
        }

        let instance_id = instance_id.unwrap_or_else(new_instance_id);
        let mut consoles = self.consoles.lock().await;
        let console = consoles.entry(instance_id.clone()).or_insert_with(|| {
            tracing::info!(instance = %instance_id, "Starting console operator");
            ConsoleOperator {
                handle: StageOperator::spawn(
                    self.store.clone(),
                    self.config.clone(),
                    self.clock,
                    instance_id.clone(),
                ),
                connections: 0,
            }
        });
        console.connections += 1;

        StageLink {
            instance_id,
            handle: console.handle.clone(),
        }
    }

    /// Detach a stage connection; the last one out stops its console operator
    pub async fn detach_stage(&self, link: &StageLink) {
        if self.house.is_some() {
            return;
        }

        let mut consoles = self.consoles.lock().await;
        let Some(console) = consoles.get_mut(&link.instance_id) else {
            return;
        };
        console.connections = console.connections.saturating_sub(1);
        if console.connections == 0 {
            if let Some(console) = consoles.remove(&link.instance_id) {
                drop(consoles);
                console.handle.shutdown().await;
            }
        }
    }

    /// Current records plus the derived view
    pub async fn show_state(&self) -> Result<ShowState, StoreError> {
        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        let world: World = store::read_or_default(&*self.store, paths::WORLD).await?;
        let view = ShowView::derive(
            &director,
            &session,
            &world,
            self.config.glitch_threshold,
            self.clock.now_ms(),
        );

        Ok(ShowState {
            director,
            session,
            world,
            view,
        })
    }

    pub async fn export_state(&self) -> Result<StoreSnapshot, StoreError> {
        self.store.export_snapshot().await
    }

    pub async fn import_state(&self, snapshot: StoreSnapshot) -> Result<(), StoreError> {
        self.store.import_snapshot(snapshot).await
    }

    /// Stop every operator, releasing their leases
    pub async fn shutdown(&self) {
        if let Some(house) = &self.house {
            house.shutdown().await;
        }
        let consoles: Vec<ConsoleOperator> =
            self.consoles.lock().await.drain().map(|(_, c)| c).collect();
        for console in consoles {
            console.handle.shutdown().await;
        }
    }
}
