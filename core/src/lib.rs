//! Client core for the hemolink blood-donor coordination platform.
//!
//! The interesting machinery is the data-freshness and resilience layer
//! between the view layer and the backend API: a short-TTL read cache, an
//! error classifier with a retry/backoff policy, a debounced trigger
//! funnel, an HTTP client that refreshes an expired credential at most
//! once per burst of 401s, a refresh broadcast bus, and the dashboard
//! orchestrator that ties them together into one read model.

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod dashboard;
pub mod debounce;
pub mod error;
pub mod http;
pub mod models;
pub mod retry;

pub use api::DonorApi;
pub use api::DonorSearch;
pub use bus::RefreshBus;
pub use bus::RefreshReason;
pub use bus::RefreshSubscription;
pub use cache::TtlCache;
pub use config::ClientConfig;
pub use connectivity::ConnectionState;
pub use connectivity::ConnectivityMonitor;
pub use credentials::CredentialStore;
pub use dashboard::DashboardOrchestrator;
pub use dashboard::DashboardSnapshot;
pub use dashboard::Section;
pub use dashboard::SectionState;
pub use debounce::Debouncer;
pub use error::ApiError;
pub use error::ClassifiedError;
pub use error::ErrorKind;
pub use error::FailureInput;
pub use error::Severity;
pub use error::classify;
pub use http::HttpClient;
pub use http::SessionState;
pub use models::BloodBankStats;
pub use models::BloodDrive;
pub use models::BloodGroup;
pub use models::Donation;
pub use models::DonorProfile;
pub use models::SignupRequest;
pub use retry::RetryOutcome;
pub use retry::RetryPolicy;

/// Wires up the client stack for one application root: credential store,
/// HTTP client, cache, refresh bus and typed API. Dashboard orchestrators
/// are built on top with [`DashboardOrchestrator::new`].
pub fn build_api(config: &ClientConfig) -> Result<DonorApi, ApiError> {
    let credentials = CredentialStore::new(&config.state_dir())
        .map_err(|err| ApiError::Credential(err.to_string()))?;
    let http = HttpClient::new(config.base_url.clone(), credentials, config.request_timeout)?;
    Ok(DonorApi::new(
        http,
        TtlCache::new(),
        RefreshBus::new(),
        config,
    ))
}
