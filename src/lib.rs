//! JSON HTTP daemon exposing video captions, web search, and hosted
//! text-model pipelines behind uniform endpoints.

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline_cache;
pub mod registry;
