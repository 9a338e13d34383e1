pub mod engine;
pub mod feed;
pub mod fired;
pub mod inbox;
pub mod model;
pub mod routing;
pub mod settings;
pub mod triggers;
pub mod watcher;
