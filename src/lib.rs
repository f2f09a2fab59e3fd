pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod paths;
pub mod protocol;
pub mod repository;
pub mod services;
pub mod stack;
