//! news-operator: Kubernetes controllers and admission webhooks for news Sources and HotNews queries

pub mod client;
pub mod condition;
pub mod config;
pub mod controllers;
pub mod feedgroup;
pub mod health;
pub mod hotnews;
pub mod mapping;
pub mod source;
pub mod store;
pub mod webhook;

#[cfg(test)]
mod test_utils;

pub use hotnews::HotNews;
pub use source::Source;
