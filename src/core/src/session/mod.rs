mod manager;
mod service;

pub use manager::SessionManager;
pub use service::{AccountService, SessionService};
