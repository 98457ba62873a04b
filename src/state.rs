use std::sync::Arc;

use crate::auth::ConnectionAuthenticator;
use crate::config::Config;
use crate::services::{MessagingService, TimelineDirectory};
use crate::websocket::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<MessagingService>,
    pub directory: Arc<dyn TimelineDirectory>,
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub registry: RoomRegistry,
}
