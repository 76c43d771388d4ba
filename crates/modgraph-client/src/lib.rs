//! HTTP module repository for modgraph
//!
//! Talks to a module service exposing `GET /api/modules` (a `name -> module`
//! object), `POST /api/modules`, `PATCH /api/modules/{name}` and
//! `DELETE /api/modules/{name}`. Status codes map onto the repository error
//! kinds: 404 is not found, 400 and 422 are validation failures, 409 is a
//! conflict, anything else (timeouts included) is a transport failure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;

pub use client::{HttpClientConfig, HttpModuleRepository};
