//! Valet - CRD-driven Kubernetes operator for client-credential lifecycle management
//!
//! Valet provisions, rotates, and revokes short-lived client credentials held by
//! an external identity provider, mirroring each credential into a Kubernetes
//! Secret for consumption by workloads.
//!
//! # Architecture
//!
//! A generic reconciliation engine drives the full credential lifecycle for any
//! provider plugin:
//! - Users declare desired state as a provider-specific custom resource
//! - The engine installs a finalizer, validates the spec, and provisions a
//!   credential at the external provider
//! - Credentials are mirrored into an owned output Secret and rotated before
//!   their renewal window closes
//! - On deletion every usable credential is revoked before the finalizer is
//!   released, so no external credential is ever orphaned
//!
//! # Modules
//!
//! - [`framework`] - Generic reconciliation engine, status algebra, and the
//!   provider contract
//! - [`azure`] - Azure AD provider (client secrets via Microsoft Graph)
//! - [`mock`] - Mock provider for engine and e2e tests
//! - [`server`] - Metrics and health-probe HTTP server
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod azure;
pub mod error;
pub mod framework;
pub mod mock;
pub mod server;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
