pub mod config;
pub mod deliver;
pub mod fetcher;
pub mod filter;
pub mod logging;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telegram;
pub mod types;

pub use config::Config;
pub use deliver::Deliverer;
pub use fetcher::{Fetcher, HttpPageSource};
pub use filter::ItemFilter;
pub use orchestrator::{launch, Orchestrator, RelayState};
pub use parser::PageParser;
pub use pipeline::IngestPipeline;
pub use render::Renderer;
pub use retry::RetryPolicy;
pub use scheduler::{JobKind, JobScheduler, Schedule};
pub use store::NewsStore;
pub use telegram::TelegramSink;
pub use types::*;
