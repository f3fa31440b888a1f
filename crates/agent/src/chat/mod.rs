//! Chat runtimes: deterministic fast paths, the blocking tool loop, and
//! the streaming two-stage runtime.

pub mod global;
pub mod intents;
pub mod runtime;
pub mod streaming;

pub use intents::{try_handle_case_intents, try_handle_global_intents, IntentResult};
pub use runtime::{run_chat, ChatRunResult};
pub use streaming::run_chat_stream;
