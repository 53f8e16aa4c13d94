pub mod calendar;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod validation;
pub mod wal;
pub mod wire;
