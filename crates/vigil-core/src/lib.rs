pub mod config;
pub mod logs;
pub mod paths;
pub mod sessions;
pub mod tasks;

pub use config::*;
pub use logs::*;
pub use paths::*;
pub use sessions::*;
pub use tasks::*;
