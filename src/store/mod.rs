pub mod backend_storage;
pub mod folder_repository;
pub mod listenable;
pub mod manager;
pub mod repo;
pub mod sqlite;

pub use backend_storage::{BackendStorageFactory, LocalBackendStorage};
pub use folder_repository::FolderRepository;
pub use listenable::{ListenableMessageStore, MessageStoreListener};
pub use manager::{MessageStoreFactory, MessageStoreManager};
pub use repo::MessageStore;
