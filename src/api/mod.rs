//! HTTP API Module
//!
//! Provides a REST API for topology administration and derived
//! configuration.

mod http;

pub use http::{
    AppState, ErrorResponse, HealthResponse, HttpServer, NewInstanceRequest, NewLinkRequest,
    NewReplicasetRequest, ZoneWeightRequest,
};
