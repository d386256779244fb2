pub mod config;
pub mod event;
pub mod logging;
pub mod metrics;
pub mod notifications;
pub mod pipeline;
pub mod publisher;
pub mod settings;
pub mod source;
pub mod transform;
