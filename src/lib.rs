pub mod agent;
pub mod config;
pub mod db;
pub mod dtos;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod service;
pub mod utils;

use std::sync::Arc;

use config::Config;
use db::db::DBClient;
use realtime::hub::{ChangeHub, DEFAULT_BACKLOG};
use service::{
    account_service::AccountService, chat_service::ChatService, labour_service::LabourService,
    matching_service::MatchingService, presence::LocationService,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub hub: Arc<ChangeHub>,
    pub http_client: reqwest::Client,
    // Services
    pub labour_service: Arc<LabourService>,
    pub matching_service: Arc<MatchingService>,
    pub chat_service: Arc<ChatService>,
    pub account_service: Arc<AccountService>,
    pub location_service: Arc<LocationService>,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config) -> Self {
        let db_client_arc = Arc::new(db_client);
        let hub = Arc::new(ChangeHub::new(DEFAULT_BACKLOG));

        let matching_service = Arc::new(MatchingService::new(
            db_client_arc.clone(),
            hub.clone(),
            config.match_radius_km,
            config.assignment_timeout_secs,
        ));

        let labour_service = Arc::new(LabourService::new(
            db_client_arc.clone(),
            hub.clone(),
            matching_service.clone(),
        ));

        let chat_service = Arc::new(ChatService::new(db_client_arc.clone(), hub.clone()));
        let account_service = Arc::new(AccountService::new(
            db_client_arc.clone(),
            hub.clone(),
            config.clone(),
        ));
        let location_service = Arc::new(LocationService::new(db_client_arc.clone(), hub.clone()));

        Self {
            env: config,
            db_client: db_client_arc,
            hub,
            http_client: reqwest::Client::new(),
            labour_service,
            matching_service,
            chat_service,
            account_service,
            location_service,
        }
    }
}
