//! Lash Kube - resource lifecycle engine for the lash installer
//!
//! This crate provides:
//! - **Resource Client**: CRUD and watch over any kind through [`KindRef`], backed by
//!   a live cluster ([`ClusterClient`]) or memory ([`MockResourceClient`])
//! - **Watch Engine**: [`watch_until`] blocks until a stop predicate holds, with
//!   distinct errors for stream closure, cancellation and timeout
//! - **Teardown Sequencer**: removes everything in a fixed, finalizer-safe order
//! - **Install Driver**: framework chart, catalog providers and packages, Core claim
//! - **Event Bus**: progress events decoupled from how they are rendered
//! - **Claims**: the Core and Gitops configuration claims behind one trait

pub mod claims;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod framework;
pub mod install;
pub mod kinds;
pub mod object;
pub mod teardown;
pub mod watch;

pub use claims::{Core, Gitops, ManagedResource};
pub use client::{
    ClusterClient, MockResourceClient, PatchKind, ResourceClient, WatchEvent, WatchEventType,
};
pub use connection::{ConnectionContext, load_connection, resolve_connection};
pub use error::{KubeError, Result};
pub use events::{Event, EventBus, EventKind, EventRecorder, SubscriptionId, Subscriptions};
pub use framework::{ChartInstall, ChartManager, FrameworkInstance, HelmCli, ProxySettings};
pub use install::{
    CatalogSource, ChartIndex, ChartVersion, Collaborators, InstallOptions, InstallSummary,
    Installer, ManifestFetcher, PackageInfo, PackageRole, Prompter,
};
pub use kinds::{KindRef, KindSpec, ResourceRef, Scope};
pub use object::{ObjectExt, decode};
pub use teardown::{Phase, StepReport, Teardown, TeardownOptions, TeardownReport};
pub use watch::{WatchTarget, watch_until};
