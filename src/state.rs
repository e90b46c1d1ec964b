use crate::config::Config;
use crate::db::Database;
use crate::storage::FileStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn FileStore>,
    pub config: Arc<Config>,
}
