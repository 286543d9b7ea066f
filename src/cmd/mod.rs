//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Command handled                                  |
//! |----------|--------------------------------------------------|
//! | `status` | `Status` — one-shot phase progress snapshot      |
//! | `watch`  | `Watch` — live progress via the realtime channel |

pub mod status;
pub mod watch;

pub use status::cmd_status;
pub use watch::cmd_watch;
