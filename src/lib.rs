pub mod config;
pub mod content;
pub mod error;
pub mod geo;
pub mod inspector;
pub mod metrics;
pub mod rules;
pub mod waf;

pub use config::*;
pub use error::*;
pub use inspector::*;
pub use metrics::*;
