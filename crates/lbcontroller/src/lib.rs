//! lbcontroller: reconciles Kubernetes LoadBalancer Services against a load
//! balancer JSON API

pub mod client;
pub mod config;
pub mod controller;
pub mod key;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod retry;
pub mod source;

pub use client::{LbApiClient, LoadBalancerApi};
pub use config::ControllerConfig;
pub use reconciler::ServiceReconciler;
