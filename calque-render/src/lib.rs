pub mod agent;
pub mod blockmap;
pub mod config;
pub mod error;
pub mod pool;
pub mod prober;
pub mod protocol;
pub mod renderer;
pub mod worker;

pub use config::MirrorConfig;
pub use error::RenderError;
pub use pool::{PoolReport, WorkerPool};
pub use prober::{HttpProber, PageProber, ProbedPage};
pub use protocol::{Cookie, DownloadTask, Message};
pub use renderer::{HttpRenderer, PageRenderer};
pub use worker::{WorkerCommand, WorkerState};
