#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Ghostwire routes pods labeled `preview` to matching preview services
//! instead of the active ones, at L4, with DNAT rules. No app code changes,
//! no mesh dependency, no DNS roulette.
//!
//! The `init` subcommand discovers active/preview service pairs and
//! materializes the private DNAT chain; the `watcher` subcommand polls the
//! owning pod's role label and toggles the single jump rule that activates
//! the chain.

pub mod admin;
pub mod config;
pub mod metrics;
pub mod prepare;
pub mod readiness;
pub mod watcher;
