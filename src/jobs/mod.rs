//! Lock-guarded periodic maintenance.
//!
//! Jobs run as independent units of concurrency; consistency comes
//! solely from the named locks in [`crate::state::SharedState`]. Every
//! job catches its faults locally and reports a boolean outcome, so one
//! failing job never blocks a lock or a later scheduled run.

mod invite;
mod maintenance;
mod runner;

pub use invite::{LinkMode, LinkRefresh, refresh_invite_link};
pub use maintenance::{
    backup_files, flush_regex_counters, minute_tick, refresh_admins, report_status,
    request_word_removal, resend_links, reset_monthly, rotate_logs,
};
pub use runner::{MaintenanceRunner, RunnerMessage};

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{BotSettings, GroupDirectory};
use crate::exchange::Publisher;
use crate::state::SharedState;
use crate::telegram::GroupApi;

/// Everything a maintenance job needs: transport, publisher, shared
/// registries, group directory and settings.
pub struct JobContext<A> {
    pub api: Arc<A>,
    pub publisher: Arc<Publisher<A>>,
    pub state: Arc<SharedState>,
    pub groups: Arc<RwLock<GroupDirectory>>,
    pub settings: Arc<BotSettings>,
}

impl<A> Clone for JobContext<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            publisher: Arc::clone(&self.publisher),
            state: Arc::clone(&self.state),
            groups: Arc::clone(&self.groups),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<A: GroupApi> std::fmt::Debug for JobContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("sender", &self.settings.sender)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixture for job tests.

    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::JobContext;
    use crate::config::{BotSettings, GroupDirectory};
    use crate::exchange::Publisher;
    use crate::state::SharedState;
    use crate::telegram::ChatId;
    use crate::telegram::mock::MockApi;

    pub const PRIMARY: ChatId = -1001;
    pub const FALLBACK: ChatId = -1002;
    pub const DEBUG: ChatId = -1003;
    pub const CRITICAL: ChatId = -1004;

    /// Builds a mock-backed context rooted in a temp directory.
    pub fn mock_context(dir: &std::path::Path) -> (JobContext<MockApi>, Arc<MockApi>) {
        let mut settings: BotSettings = serde_json::from_value(serde_json::json!({
            "sender": "TIP",
            "exchange_channel": { "id": PRIMARY, "access_hash": 0 },
            "hide_channel": { "id": FALLBACK, "access_hash": 0 },
            "debug_channel": { "id": DEBUG, "access_hash": 0 },
            "critical_channel": { "id": CRITICAL, "access_hash": 0 },
            "exchange_key": "00".repeat(32),
        }))
        .unwrap();
        settings.data_dir = dir.to_path_buf();
        settings.tmp_dir = dir.to_path_buf();
        settings.log_path = dir.join("log");

        let api = Arc::new(MockApi::new());
        let publisher = Arc::new(Publisher::new(Arc::clone(&api), &settings, [0u8; 32]));

        let ctx = JobContext {
            api: Arc::clone(&api),
            publisher,
            state: Arc::new(SharedState::load(dir)),
            groups: Arc::new(RwLock::new(GroupDirectory::default())),
            settings: Arc::new(settings),
        };

        (ctx, api)
    }
}
