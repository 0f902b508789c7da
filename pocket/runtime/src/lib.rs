//! # Pocket Runtime
//!
//! Hosts mini-programs on the native side. Every app is split across two
//! kinds of realm that never share memory:
//!
//! - one **logic realm** running the app's business logic
//! - one **render realm** per page, holding that page's node tree
//!
//! The runtime sits between them. It leases realms from pools, keeps each
//! app's page stack, and runs the [`Bridge`] that resolves API invocations
//! against the [`ModuleRegistry`], answers callbacks exactly once, and
//! relays publish events between realms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────── Engine ───────────────────────────────┐
//! │  logic pool   render pool   ModuleRegistry   MainQueue   running apps │
//! │                                                                       │
//! │  ┌──────────────────────── AppService ─────────────────────────────┐  │
//! │  │   LogicRealm  <── Bridge ──>  page stack [RenderRealm, ...]     │  │
//! │  └─────────────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Realm output enters through [`AppService::handle_logic_message`] and
//! [`AppService::handle_render_message`]. Anything that touches a surface or
//! presentation runs on the [`MainQueue`], which the host drives with a
//! [`MainQueueWorker`].

mod app;
mod bridge;
mod config;
mod engine;
mod error;
mod modules;
mod pool;
mod queue;
mod realm;
mod registry;

pub use app::{
    split_url, AppIdentity, AppService, AppState, Environment, LaunchOptions, ModuleInstances,
    PageInfo, PresentationHost,
};
pub use bridge::{Bridge, PendingInvocation, RealmRouter, Responder, SubscriptionId};
pub use config::{PoolConfig, RuntimeConfig};
pub use engine::{Engine, EngineContext, HostEvent, LifecycleObserver, LogicPool, RenderPool};
pub use error::{Result, RuntimeError};
pub use modules::builtin_modules;
pub use pool::{Factory, HealthCheck, Lease, PoolStats, ResourcePool};
pub use queue::{MainQueue, MainQueueWorker};
pub use realm::{
    ChannelLogicRealm, ChannelRenderRealm, LocalRenderRealm, LogicRealm, LogicTraffic, Reclaimer,
    RenderOutbox, RenderRealm, RenderTraffic,
};
pub use registry::{
    ApiCall, ApiEntry, ApiHandler, AsyncApiHandler, Dispatch, ModuleRegistry, ModuleSpec,
};
