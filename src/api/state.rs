use std::sync::Arc;

use crate::config::Config;
use crate::ledger::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<LedgerStore>,
}

impl AppState {
    pub fn new(config: Config, store: LedgerStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }
}
