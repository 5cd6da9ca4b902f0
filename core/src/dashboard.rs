use crate::api::DonorApi;
use crate::bus::RefreshSubscription;
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::debounce::Debouncer;
use crate::error::ClassifiedError;
use crate::models::BloodBankStats;
use crate::models::BloodDrive;
use crate::models::Donation;
use crate::models::DonorProfile;
use crate::retry::RetryOutcome;
use crate::retry::RetryPolicy;
use crate::retry::retry_with_backoff_while;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The four independently fetched dashboard data groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    UserData,
    Donations,
    BloodBankStats,
    UpcomingDrives,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::UserData,
        Section::Donations,
        Section::BloodBankStats,
        Section::UpcomingDrives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::UserData => "user_data",
            Section::Donations => "donations",
            Section::BloodBankStats => "blood_bank_stats",
            Section::UpcomingDrives => "upcoming_drives",
        }
    }

    /// Context prefix used in user-facing section error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Section::UserData => "User data",
            Section::Donations => "Donation history",
            Section::BloodBankStats => "Blood bank statistics",
            Section::UpcomingDrives => "Upcoming drives",
        }
    }
}

/// State of one dashboard section. Owned by the orchestrator; mutated only
/// through its fetch functions. `data` survives later failures so stale
/// values stay visible during an outage.
#[derive(Debug, Clone, Serialize)]
pub struct SectionState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
    pub retry_attempts: u32,
    pub error_detail: Option<ClassifiedError>,
}

impl<T> Default for SectionState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            retry_attempts: 0,
            error_detail: None,
        }
    }
}

impl<T> SectionState<T> {
    fn succeed(&mut self, data: T) {
        self.data = Some(data);
        self.loading = false;
        self.error = None;
        self.error_detail = None;
        self.retry_attempts = 0;
    }

    fn fail(&mut self, message: String, error: ClassifiedError, attempts: u32) {
        self.loading = false;
        self.error = Some(message);
        self.error_detail = Some(error);
        self.retry_attempts = attempts;
    }
}

/// Read model handed to the view layer. Published through a watch channel
/// after every state change; cheap to clone.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub user_data: SectionState<DonorProfile>,
    pub donations: SectionState<Vec<Donation>>,
    pub blood_bank_stats: SectionState<BloodBankStats>,
    pub upcoming_drives: SectionState<Vec<BloodDrive>>,
    /// True only while no data of any kind exists yet.
    pub loading: bool,
    /// True while a pass runs on top of existing data.
    pub refreshing: bool,
    /// Page-level failure: the essential profile section could not be
    /// loaded and there is nothing older to show.
    pub fatal_error: Option<String>,
    /// Some sections loaded, some failed in the last pass.
    pub partial_data_loaded: bool,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            user_data: SectionState::default(),
            donations: SectionState::default(),
            blood_bank_stats: SectionState::default(),
            upcoming_drives: SectionState::default(),
            loading: true,
            refreshing: false,
            fatal_error: None,
            partial_data_loaded: false,
        }
    }
}

impl DashboardSnapshot {
    pub fn has_any_data(&self) -> bool {
        self.user_data.data.is_some()
            || self.donations.data.is_some()
            || self.blood_bank_stats.data.is_some()
            || self.upcoming_drives.data.is_some()
    }

    pub fn has_any_error(&self) -> bool {
        self.user_data.error.is_some()
            || self.donations.error.is_some()
            || self.blood_bank_stats.error.is_some()
            || self.upcoming_drives.error.is_some()
    }

    /// Sections that failed in the latest pass, for the partial-failure
    /// banner.
    pub fn failed_sections(&self) -> Vec<Section> {
        let mut failed = Vec::new();
        if self.user_data.error.is_some() {
            failed.push(Section::UserData);
        }
        if self.donations.error.is_some() {
            failed.push(Section::Donations);
        }
        if self.blood_bank_stats.error.is_some() {
            failed.push(Section::BloodBankStats);
        }
        if self.upcoming_drives.error.is_some() {
            failed.push(Section::UpcomingDrives);
        }
        failed
    }
}

struct Inner {
    api: DonorApi,
    policy: RetryPolicy,
    connectivity: ConnectivityMonitor,
    state: Mutex<DashboardSnapshot>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    pass_in_flight: AtomicBool,
}

/// Coordinates the four dashboard sections: one fetch pass at a time, with
/// per-section retry and terminal error classification. Refresh triggers
/// (manual, periodic, focus, bus) all funnel through one debouncer so a
/// burst collapses into a single pass.
pub struct DashboardOrchestrator {
    inner: Arc<Inner>,
    refresh_debounce: Debouncer<()>,
    auto_refresh_interval: Duration,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    bus_subscription: Mutex<Option<RefreshSubscription>>,
}

impl DashboardOrchestrator {
    pub fn new(api: DonorApi, config: &ClientConfig) -> Self {
        let snapshot = DashboardSnapshot::default();
        let (snapshot_tx, _) = watch::channel(snapshot.clone());
        let inner = Arc::new(Inner {
            api,
            policy: config.retry,
            connectivity: ConnectivityMonitor::new(),
            state: Mutex::new(snapshot),
            snapshot_tx,
            pass_in_flight: AtomicBool::new(false),
        });
        let refresh_debounce = {
            let inner = Arc::clone(&inner);
            Debouncer::new(config.debounce_window, move || {
                let inner = Arc::clone(&inner);
                async move { inner.run_pass().await }
            })
        };
        Self {
            inner,
            refresh_debounce,
            auto_refresh_interval: config.auto_refresh_interval,
            interval_task: Mutex::new(None),
            bus_subscription: Mutex::new(None),
        }
    }

    /// Mount: subscribes to the refresh bus, starts the periodic refresh
    /// task and runs the initial fetch pass. Completes when the initial
    /// pass has settled.
    pub async fn start(&self) {
        let subscription = {
            let debounce = self.refresh_debounce.clone();
            let handle = tokio::runtime::Handle::current();
            self.inner.api.bus().subscribe(move |reason| {
                tracing::debug!(reason = reason.as_str(), "refresh requested via bus");
                let debounce = debounce.clone();
                handle.spawn(async move {
                    debounce.invoke().await;
                });
            })
        };
        *lock(&self.bus_subscription) = Some(subscription);

        let interval_task = {
            let debounce = self.refresh_debounce.clone();
            let period = self.auto_refresh_interval;
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tracing::debug!("periodic dashboard refresh");
                    debounce.invoke().await;
                }
            })
        };
        if let Some(previous) = lock(&self.interval_task).replace(interval_task) {
            previous.abort();
        }

        self.refresh_debounce.invoke().await;
    }

    /// Manual refresh. Collapses with other triggers inside the debounce
    /// window; a no-op if a pass is already in flight when it fires.
    pub async fn refresh(&self) {
        self.refresh_debounce.invoke().await;
    }

    /// The window regained focus.
    pub async fn notify_focus(&self) {
        tracing::debug!("window focus dashboard refresh");
        self.refresh_debounce.invoke().await;
    }

    /// One-off retry of a single section, bypassing the cache and the pass
    /// guard.
    pub async fn fetch_section(&self, section: Section) -> bool {
        match section {
            Section::UserData => self.inner.fetch_user_data(true).await,
            Section::Donations => self.inner.fetch_donations(true).await,
            Section::BloodBankStats => self.inner.fetch_blood_bank_stats(true).await,
            Section::UpcomingDrives => self.inner.fetch_upcoming_drives(true).await,
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        lock(&self.inner.state).clone()
    }

    /// Receiver that yields a fresh snapshot after every state change.
    pub fn watch(&self) -> watch::Receiver<DashboardSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Teardown: stops the periodic task and drops the bus subscription,
    /// mirroring what `start` registered.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.interval_task).take() {
            task.abort();
        }
        lock(&self.bus_subscription).take();
    }
}

impl Drop for DashboardOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Inner {
    /// Applies a state mutation and publishes the resulting snapshot.
    fn mutate<R>(&self, f: impl FnOnce(&mut DashboardSnapshot) -> R) -> R {
        let mut state = lock(&self.state);
        let result = f(&mut state);
        self.snapshot_tx.send_replace(state.clone());
        result
    }

    /// One coordinated attempt to (re)populate all four sections. Guarded:
    /// a pass triggered while another is in flight is a no-op.
    async fn run_pass(&self) {
        if self
            .pass_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("fetch pass already in flight; trigger ignored");
            return;
        }

        let is_refresh = self.mutate(|state| {
            let has_data = state.has_any_data();
            if has_data {
                state.refreshing = true;
            } else {
                state.loading = true;
            }
            state.fatal_error = None;
            has_data
        });

        // Refresh passes bypass the read cache; the point is new data.
        let force = is_refresh;
        let (user_ok, donations_ok, stats_ok, drives_ok) = tokio::join!(
            self.fetch_user_data(force),
            self.fetch_donations(force),
            self.fetch_blood_bank_stats(force),
            self.fetch_upcoming_drives(force),
        );

        let successes = [user_ok, donations_ok, stats_ok, drives_ok]
            .into_iter()
            .filter(|ok| *ok)
            .count();
        let failures = Section::ALL.len() - successes;

        self.mutate(|state| {
            state.partial_data_loaded = successes > 0 && failures > 0;
            if !is_refresh {
                let profile_unavailable =
                    state.user_data.data.is_none() && state.user_data.error.is_some();
                if profile_unavailable {
                    state.fatal_error = Some(
                        "Failed to load essential dashboard data. Please try again.".to_string(),
                    );
                } else if failures == Section::ALL.len() {
                    state.fatal_error = Some(
                        "Failed to load dashboard data. Please check your connection and try again."
                            .to_string(),
                    );
                }
            }
            state.loading = false;
            state.refreshing = false;
        });

        self.pass_in_flight.store(false, Ordering::SeqCst);
    }

    async fn fetch_user_data(&self, force: bool) -> bool {
        let api = self.api.clone();
        self.fetch_into(
            Section::UserData,
            move || {
                let api = api.clone();
                async move { api.user_dashboard_data(force).await }
            },
            |state| &mut state.user_data,
        )
        .await
    }

    async fn fetch_donations(&self, _force: bool) -> bool {
        let api = self.api.clone();
        self.fetch_into(
            Section::Donations,
            move || {
                let api = api.clone();
                async move { api.donations().await }
            },
            |state| &mut state.donations,
        )
        .await
    }

    async fn fetch_blood_bank_stats(&self, force: bool) -> bool {
        let api = self.api.clone();
        self.fetch_into(
            Section::BloodBankStats,
            move || {
                let api = api.clone();
                async move { api.blood_bank_stats(force).await }
            },
            |state| &mut state.blood_bank_stats,
        )
        .await
    }

    async fn fetch_upcoming_drives(&self, _force: bool) -> bool {
        let api = self.api.clone();
        self.fetch_into(
            Section::UpcomingDrives,
            move || {
                let api = api.clone();
                async move { api.upcoming_drives().await }
            },
            |state| &mut state.upcoming_drives,
        )
        .await
    }

    /// Shared per-section fetch loop: mark loading, retry with backoff
    /// (skipping further attempts while offline), then record either the
    /// data or the classified terminal error.
    async fn fetch_into<T, F, Fut, S>(&self, section: Section, op: F, select: S) -> bool
    where
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, crate::error::ApiError>>,
        S: Fn(&mut DashboardSnapshot) -> &mut SectionState<T>,
    {
        self.mutate(|state| select(state).loading = true);

        let gate = {
            let connectivity = self.connectivity.clone();
            move || connectivity.is_online()
        };
        let outcome = retry_with_backoff_while(self.policy, gate, op).await;

        match outcome {
            RetryOutcome::Success(data) => {
                self.connectivity.report_success();
                self.mutate(|state| select(state).succeed(data));
                true
            }
            RetryOutcome::Exhausted { error, attempts } => {
                self.connectivity.report_failure(&error);
                tracing::warn!(
                    section = section.as_str(),
                    attempts,
                    "section fetch failed: {}",
                    error.user_message
                );
                let message = error.with_context(section.label());
                self.mutate(|state| select(state).fail(message, error, attempts));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_snapshot_is_initial_loading() {
        let snapshot = DashboardSnapshot::default();
        assert!(snapshot.loading);
        assert!(!snapshot.refreshing);
        assert!(!snapshot.has_any_data());
        assert!(!snapshot.has_any_error());
        assert_eq!(snapshot.failed_sections(), Vec::<Section>::new());
    }

    #[test]
    fn section_success_clears_previous_error() {
        let mut section: SectionState<u32> = SectionState::default();
        let error = crate::error::classify(&crate::error::FailureInput::new("connect", None));
        section.fail("User data: boom".to_string(), error, 3);
        assert_eq!(section.retry_attempts, 3);
        assert!(section.error.is_some());

        section.succeed(7);
        assert_eq!(section.data, Some(7));
        assert_eq!(section.retry_attempts, 0);
        assert!(section.error.is_none());
        assert!(section.error_detail.is_none());
    }

    #[test]
    fn failure_keeps_previously_loaded_data() {
        let mut section: SectionState<u32> = SectionState::default();
        section.succeed(7);
        let error = crate::error::classify(&crate::error::FailureInput::new("connect", None));
        section.fail("User data: boom".to_string(), error, 3);
        assert_eq!(section.data, Some(7));
        assert!(section.error.is_some());
    }

    #[test]
    fn failed_sections_lists_each_failing_group() {
        let mut snapshot = DashboardSnapshot::default();
        let error = crate::error::classify(&crate::error::FailureInput::new("connect", None));
        snapshot
            .donations
            .fail("Donation history: boom".to_string(), error.clone(), 1);
        snapshot
            .upcoming_drives
            .fail("Upcoming drives: boom".to_string(), error, 1);
        assert_eq!(
            snapshot.failed_sections(),
            vec![Section::Donations, Section::UpcomingDrives]
        );
    }

    #[test]
    fn section_labels_are_stable() {
        assert_eq!(Section::UserData.label(), "User data");
        assert_eq!(Section::BloodBankStats.as_str(), "blood_bank_stats");
        assert_eq!(Section::ALL.len(), 4);
    }
}
