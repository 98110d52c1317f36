use std::sync::Arc;
use crate::{config::Config, issuer::CardIssuer, store::CardStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CardStore>,
    pub issuer: Arc<dyn CardIssuer>,
    pub config: Arc<Config>,
}
