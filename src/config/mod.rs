pub mod loader;
pub mod watcher;
pub use loader::*;
pub use watcher::GeoDbWatcher;
