use anyhow::Result;
use log::{error, info};
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::controller::MessagingController;

pub struct DaemonConfig {
    pub interval_secs: u64,
}

/// Syncs every account, then sleeps, until Ctrl-C.
pub fn run_daemon(controller: &MessagingController, cfg: DaemonConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    info!("daemon started, syncing every {}s", cfg.interval_secs);
    while running.load(Ordering::SeqCst) {
        sync_all(controller, &running);
        sleep_while_running(&running, Duration::from_secs(cfg.interval_secs));
    }
    info!("daemon stopped");
    Ok(())
}

/// One pass over all accounts. Stops early once `running` is cleared.
pub fn sync_all(controller: &MessagingController, running: &AtomicBool) {
    for account in controller.account_manager().accounts() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = controller.sync_account(&account) {
            error!("sync of account {} failed: {e:#}", account.uuid);
        }
    }
}

// short naps so Ctrl-C is honoured promptly
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(250)));
    }
}
