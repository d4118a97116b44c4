#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Kubernetes plumbing for ghostwire: typed API re-exports, active/preview
//! service discovery, and the pod role poller.

pub mod discovery;
pub mod labels;
pub mod pattern;
pub mod poller;

pub use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, ResourceExt},
    Client, Error,
};
