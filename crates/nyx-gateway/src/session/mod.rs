//! Session and resume state

mod manager;

pub use manager::SessionManager;
