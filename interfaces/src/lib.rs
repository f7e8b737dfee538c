pub mod defs;

pub use defs::{FetchError, MessageSink, OutboundMessage, PageSource, ParseMode, SinkError};
