pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;
