pub mod auth;
pub mod dispatch;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wire;
