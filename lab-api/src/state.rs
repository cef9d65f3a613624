use lab_orchestrator::{IdleReaper, LifecycleOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: LifecycleOrchestrator,
    pub reaper: IdleReaper,
}

impl AppState {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self {
            reaper: IdleReaper::new(orchestrator.clone()),
            orchestrator,
        }
    }
}
