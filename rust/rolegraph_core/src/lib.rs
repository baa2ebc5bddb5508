//! `rolegraph_core` — RBAC role graph query engine.
//!
//! Answers "who can do what" over a snapshot of Roles, ClusterRoles and
//! their bindings, and optionally "where does it run" by following
//! service accounts to pods and owning workloads. The engine is a pure
//! function: no I/O, no global state.
//!
//! Modules:
//! - `types`     — catalog records (bundles, bindings, subjects, pods, workloads)
//! - `rules`     — policy rule normalization into `RuleRef`s
//! - `discovery` — API discovery catalog used for expansion and phantom checks
//! - `config`    — query request, defaults and validation
//! - `graph`     — result graph, stable node ids and the de-duplicating builder
//! - `rbac`      — the query pipeline (aggregation, matching, scope, runtime)
//! - `error`     — error type shared by every fallible operation

pub mod config;
pub mod discovery;
pub mod error;
pub mod graph;
pub mod rbac;
pub mod rules;
pub mod types;

pub use error::{QueryError, Result};
pub use rbac::{query, query_json, QueryResponse, ResourceMapRow};
