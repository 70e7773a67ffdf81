pub mod bot;
pub mod commands;
pub mod config;
pub mod control_api;
pub mod datetime_utils;
pub mod dedup;
pub mod error_utils;
pub mod instagram;
pub mod llm;
pub mod rate_limit;
pub mod responder;
pub mod session;
pub mod social;
pub mod supervisor;
