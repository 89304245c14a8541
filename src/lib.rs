pub mod anchors;
pub mod clock;
pub mod display;
pub mod feed;
pub mod logging;
pub mod mood;
pub mod render;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod trend;
pub mod upstream;
