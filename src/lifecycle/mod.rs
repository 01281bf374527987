//! Process lifecycle: shutdown signals and controller supervision

mod shutdown;
mod supervisor;

pub use shutdown::{ShutdownSignal, StopFlag};
pub use supervisor::{launch, supervise};
