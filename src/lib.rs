//! apkforge: APK customization lane
//!
//! Takes a packaged APK and a per-request configuration payload, produces a
//! customized, re-signed copy through external apktool/signer invocations
//! over an ephemeral per-job workspace, and serves the result for a
//! time-bounded window. Expired artifacts and their metadata are reclaimed
//! by a periodic sweep; workspaces are reclaimed by a background cleanup
//! queue, decoupled from the response path.

pub mod cleaner;
pub mod config;
pub mod invoker;
pub mod patcher;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod stage;
pub mod store;
pub mod tools;
pub mod workspace;

pub use config::ForgeConfig;
pub use pipeline::{JobRequest, Pipeline, PipelineError};
pub use service::{ForgeService, Retrieval, SweepReport};
pub use stage::JobStage;
