//! Pullwire - a reconnecting WebSocket client for the Pull real-time channel
//!
//! The [`connection::ConnectionManager`] connects, subscribes to the configured
//! channels, keeps the connection alive and reconnects with backoff. Decoded
//! server frames reach the consumer as [`models::Event`] values through a
//! single ordered [`dispatch::EventStream`].

pub mod adapters;
pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod keepalive;
pub mod models;
pub mod protocol;
pub mod subscription;
pub mod traits;
