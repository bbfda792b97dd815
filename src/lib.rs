pub mod alias;
pub mod api;
pub mod config;
pub mod logging;
mod orm;
pub mod url_repo;
pub mod url_service;
