pub mod config;
pub mod invalidate;
pub mod stampede;
pub mod watch;
