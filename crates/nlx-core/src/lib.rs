pub mod config;
pub mod diagnose;
pub mod envelope;
pub mod fingerprint;
pub mod presets;
pub mod redaction;
pub mod shortcuts;
pub mod storage;
pub mod url_state;

pub use config::*;
pub use diagnose::*;
pub use envelope::*;
pub use fingerprint::*;
pub use presets::*;
pub use redaction::*;
pub use shortcuts::*;
pub use storage::*;
pub use url_state::*;
