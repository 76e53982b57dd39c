use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rs_mail_backend::account::AccountManager;
use rs_mail_backend::domain::account::Account;
use rs_mail_backend::domain::folder::{FolderInfo, FolderType};
use rs_mail_backend::store::manager::{MessageStoreFactory, SqliteMessageStoreFactory};
use rs_mail_backend::store::sqlite::SqliteMessageStore;
use rs_mail_backend::store::{ListenableMessageStore, MessageStore, MessageStoreManager};

#[derive(Default)]
struct CountingStoreFactory {
    calls: AtomicUsize,
}

impl MessageStoreFactory for CountingStoreFactory {
    fn create(&self, _account: &Account) -> Result<ListenableMessageStore> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ListenableMessageStore::new(Box::new(
            SqliteMessageStore::open_in_memory()?,
        )))
    }
}

fn account(uuid: &str) -> Account {
    Account::with_uuid(uuid.into(), "user@example.org", "imap://user:pw@host/")
}

#[test]
fn store_is_cached_per_account() -> Result<()> {
    let a = account("a");
    let accounts = AccountManager::in_memory(vec![a.clone()]);
    let factory = Arc::new(CountingStoreFactory::default());
    let manager = MessageStoreManager::new(&accounts, factory.clone());

    let first = manager.get_message_store(&a)?;
    let second = manager.get_message_store(&a)?;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn removing_account_evicts_store() -> Result<()> {
    let a = account("a");
    let b = account("b");
    let accounts = AccountManager::in_memory(vec![a.clone(), b.clone()]);
    let factory = Arc::new(CountingStoreFactory::default());
    let manager = MessageStoreManager::new(&accounts, factory.clone());

    let store_a = manager.get_message_store(&a)?;
    let store_b = manager.get_message_store(&b)?;
    accounts.delete(&a.uuid)?;

    assert!(!Arc::ptr_eq(&store_a, &manager.get_message_store(&a)?));
    assert!(Arc::ptr_eq(&store_b, &manager.get_message_store(&b)?));
    assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn sqlite_stores_persist_per_account() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = account("persisted");
    let accounts = AccountManager::in_memory(vec![a.clone()]);
    let factory = Arc::new(SqliteMessageStoreFactory::new(dir.path()));

    let manager = MessageStoreManager::new(&accounts, factory.clone());
    manager
        .get_message_store(&a)?
        .create_folders(&[FolderInfo::new("INBOX", "Inbox", FolderType::Inbox)])?;
    assert!(factory.database_path(&a.uuid).exists());

    // a fresh manager reopens the same file
    let reopened = MessageStoreManager::new(&accounts, factory);
    let ids = reopened.get_message_store(&a)?.get_remote_folder_server_ids()?;
    assert_eq!(ids, vec!["INBOX"]);
    Ok(())
}
