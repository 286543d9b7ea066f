pub mod icons;
pub mod watch;

pub use watch::WatchUI;
