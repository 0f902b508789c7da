//! # Pocket
//!
//! Pocket hosts mini-programs: small applications whose business logic runs
//! in one isolated script realm while each page renders in its own realm.
//! The two never share memory; everything between them is a serialized
//! message relayed by the native host.
//!
//! ## Core Concepts
//!
//! ### Realms
//!
//! A **logic realm** runs an app's script. A **render realm** holds one
//! page's node tree and canvases. Both are leased from pools so that a launch
//! does not pay for realm creation.
//!
//! ### The Bridge
//!
//! Every app has a bridge. It resolves `invoke` requests against the module
//! registry and guarantees each callback is answered exactly once, whatever
//! the handler does. `publish` events flow between realms without an answer.
//!
//! ### Render Sync
//!
//! The logic realm batches DOM mutations for one turn and flushes them as a
//! single ordered batch. Selector queries ride in the same batch, so a query
//! always sees the mutations queued before it.
//!
//! ## Crates
//!
//! - [`protocol`]: wire messages, render instructions, canvas operations
//! - [`render`]: node tree, batcher, canvas state, render surface
//! - [`runtime`]: engine, apps, bridge, pools, registry
//!
//! ## Example
//!
//! ```ignore
//! use pocket::runtime::{AppIdentity, Engine, Environment, LaunchOptions, RuntimeConfig};
//!
//! let (engine, worker) = Engine::new(RuntimeConfig::default(), logic_factory, render_factory)?;
//! tokio::spawn(worker.run());
//!
//! let app = engine.launch(
//!     AppIdentity::new("wx123", Environment::Production),
//!     LaunchOptions::new("pages/index").presented_by(host),
//! )?;
//! app.handle_logic_message(message)?;
//! ```

pub use pocket_protocol as protocol;
pub use pocket_render as render;
pub use pocket_runtime as runtime;

pub use pocket_runtime::{
    AppIdentity, AppService, Engine, Environment, LaunchOptions, RuntimeConfig,
};
