//! In-app ad surfaces for OpenGL render loops, driven through [glow].
//!
//! The crate runs on two kinds of threads. The thread that owns the GL
//! context creates an [`AdSdk`] and calls [`AdSdk::on_draw`] once per frame;
//! it is the only place GL objects are created, drawn or deleted. Every
//! other thread talks to the SDK through an [`AdClient`], and creatives are
//! fetched on a small worker pool so a slow ad network never stalls a frame.
//!
//! # Lifecycle
//!
//! Each ad is an [`AdHandle`] moving through [`AdState`]:
//!
//! ```text
//! Requested -> Loading -> Ready <-> Loading (refresh)
//!                    \-> Failed  -> Loading (retry)
//! any -> Released
//! ```
//!
//! A fetched creative is handed to the GL thread as a queued job and turned
//! into a texture, a vertex buffer and a vertex array during the next frame.
//! Releasing an ad on the GL thread frees those objects immediately;
//! releasing from elsewhere invalidates the handle now and frees them on the
//! next frame.
//!
//! # Features
//!
//! - **`glow`** (default): [`GlowBackend`] issuing real GL calls, and the
//!   bundled [`AdProgram`] shader. Without it only [`RecordingBackend`] is
//!   available, which is what the tests use.
//!
//! # Safety
//!
//! Constructing a [`GlowBackend`] is `unsafe`: the context must be current
//! on the thread that then calls [`AdSdk::init`]. The SDK checks thread
//! affinity on every GL-touching call and returns
//! [`AdError::WrongThread`] instead of issuing GL calls from the wrong thread.
//!
//! [glow]: https://docs.rs/glow

mod backend;
mod client;
mod config;
mod error;
mod events;
mod fetch;
mod handle;
mod instance;
mod logging;
mod queue;
mod sdk;
mod session;
#[cfg(feature = "glow")]
mod shaders;
mod store;
mod types;

#[cfg(feature = "glow")]
pub use backend::GlowBackend;
pub use backend::{DrawBindings, DrawRecord, GpuBackend, GpuResource, RecordingBackend};
pub use client::AdClient;
pub use config::AdsConfig;
pub use error::{AdError, FetchError};
pub use events::AdEvent;
pub use fetch::AdSource;
pub use handle::AdHandle;
pub use instance::{AdSnapshot, AdState};
pub use logging::{init_logging, LoggingConfig};
pub use sdk::{AdSdk, SdkStats};
pub use session::IDENTITY;
#[cfg(feature = "glow")]
pub use shaders::{AdProgram, AD_FRAGMENT_SRC, AD_VERTEX_SRC};
pub use store::{GpuResourceStore, ResourceId, StoreStats};
pub use types::{
    CullFace, DecodedAsset, DrawMode, Geometry, MAX_COMPONENTS_PER_VERTEX, UNIT_QUAD,
    UNIT_QUAD_TEXCOORDS,
};
