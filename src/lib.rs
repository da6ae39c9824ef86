pub mod app;
pub mod citations;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod output;
pub mod oyez;
pub mod pipeline;
pub mod scoring;
pub mod scotus;
pub mod sources;
pub mod status;
pub mod steps;
pub mod store;
pub mod text;
pub mod tui;
