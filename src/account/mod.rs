pub mod credentials;
pub mod manager;

pub use manager::{AccountManager, AccountRemovedListener};
