use crate::bus::RefreshBus;
use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::HttpClient;
use crate::models::BloodBankStats;
use crate::models::BloodDrive;
use crate::models::BloodGroup;
use crate::models::Donation;
use crate::models::DonorProfile;
use crate::models::SignupRequest;
use crate::models::aggregate_blood_bank_stats;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

pub const DASHBOARD_CACHE_KEY: &str = "user-dashboard-data";
pub const STATS_CACHE_KEY: &str = "blood-bank-stats";

const PROFILE_ENDPOINT: &str = "/users/me/profile";

/// Client-side donor search. Only the blood group is filtered server-side;
/// city and availability are applied here, the way the donor list screen
/// does it.
#[derive(Debug, Clone, Default)]
pub struct DonorSearch {
    pub blood_group: Option<BloodGroup>,
    pub city: Option<String>,
    /// Keep only donors currently eligible to donate again.
    pub available_only: bool,
}

/// Typed surface over the backend API. Owns the read cache and publishes
/// refresh reasons on the bus after mutating calls, so the dashboard picks
/// up its own writes.
#[derive(Clone)]
pub struct DonorApi {
    http: HttpClient,
    cache: TtlCache,
    bus: RefreshBus,
    dashboard_cache_ttl: Duration,
    stats_cache_ttl: Duration,
}

impl DonorApi {
    pub fn new(http: HttpClient, cache: TtlCache, bus: RefreshBus, config: &ClientConfig) -> Self {
        Self {
            http,
            cache,
            bus,
            dashboard_cache_ttl: config.dashboard_cache_ttl,
            stats_cache_ttl: config.stats_cache_ttl,
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn bus(&self) -> &RefreshBus {
        &self.bus
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.http.login(username, password).await?;
        self.cache.clear();
        self.bus.after_login();
        Ok(())
    }

    /// Registers a new donor, then logs them straight in.
    pub async fn signup(&self, request: &SignupRequest) -> Result<(), ApiError> {
        let _: Value = self.http.post_json("/signup/", request).await?;
        self.http.login(&request.email, &request.password).await?;
        self.cache.clear();
        self.bus.after_signup();
        Ok(())
    }

    pub async fn logout(&self) {
        self.http.logout().await;
        self.cache.clear();
    }

    pub async fn profile(&self) -> Result<DonorProfile, ApiError> {
        self.http.get_json(PROFILE_ENDPOINT).await
    }

    pub async fn update_profile(&self, profile: &DonorProfile) -> Result<DonorProfile, ApiError> {
        let updated: DonorProfile = self.http.put_json(PROFILE_ENDPOINT, profile).await?;
        self.cache.remove(DASHBOARD_CACHE_KEY);
        self.cache.remove(STATS_CACHE_KEY);
        self.bus.after_profile_update();
        Ok(updated)
    }

    /// Donation history. Sourced from the profile payload, but fetched as
    /// its own request so a history failure stays a history failure.
    pub async fn donations(&self) -> Result<Vec<Donation>, ApiError> {
        let profile: DonorProfile = self.http.get_json(PROFILE_ENDPOINT).await?;
        Ok(profile.donations)
    }

    /// Profile-derived dashboard payload, served from the short-TTL cache
    /// unless `force` asks for a fresh read.
    pub async fn user_dashboard_data(&self, force: bool) -> Result<DonorProfile, ApiError> {
        if !force {
            if let Some(cached) = self.cache.get::<DonorProfile>(DASHBOARD_CACHE_KEY) {
                return Ok(cached);
            }
        }
        let profile = self.profile().await?;
        if let Err(err) = self
            .cache
            .put(DASHBOARD_CACHE_KEY, &profile, self.dashboard_cache_ttl)
        {
            tracing::warn!("failed to cache dashboard payload: {err}");
        }
        Ok(profile)
    }

    pub async fn donors(&self) -> Result<Vec<DonorProfile>, ApiError> {
        self.http.get_json("/users").await
    }

    pub async fn donors_by_blood_group(
        &self,
        group: BloodGroup,
    ) -> Result<Vec<DonorProfile>, ApiError> {
        self.http
            .get_json(&format!("/users/blood-group/{group}"))
            .await
    }

    pub async fn donor_by_id(&self, id: i64) -> Result<DonorProfile, ApiError> {
        self.http.get_json(&format!("/users/{id}")).await
    }

    pub async fn search_donors(&self, search: &DonorSearch) -> Result<Vec<DonorProfile>, ApiError> {
        let donors = match search.blood_group {
            Some(group) => self.donors_by_blood_group(group).await?,
            None => self.donors().await?,
        };
        Ok(apply_search_filters(donors, search, Utc::now()))
    }

    /// Aggregated inventory view over the full registered-donor list,
    /// computed client-side and cached.
    pub async fn blood_bank_stats(&self, force: bool) -> Result<BloodBankStats, ApiError> {
        if !force {
            if let Some(cached) = self.cache.get::<BloodBankStats>(STATS_CACHE_KEY) {
                return Ok(cached);
            }
        }
        let donors: Vec<DonorProfile> = self.http.get_json("/users/").await?;
        let stats = aggregate_blood_bank_stats(&donors, Utc::now());
        if let Err(err) = self.cache.put(STATS_CACHE_KEY, &stats, self.stats_cache_ttl) {
            tracing::warn!("failed to cache blood bank stats: {err}");
        }
        Ok(stats)
    }

    /// Scheduled donation drives. The endpoint is optional server-side; a
    /// 404 means "none scheduled", not an error.
    pub async fn upcoming_drives(&self) -> Result<Vec<BloodDrive>, ApiError> {
        match self.http.get_json::<Vec<BloodDrive>>("/drives/upcoming").await {
            Ok(drives) => Ok(drives),
            Err(ApiError::Status { status: 404, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    // The backend has no donation/request/contact write paths yet. These
    // fail before any network call so callers get an immediate, descriptive
    // answer instead of a dangling request.

    pub async fn create_donation(&self, _donation: &Donation) -> Result<Donation, ApiError> {
        Err(ApiError::NotImplemented("create donation endpoint"))
    }

    pub async fn donation_requests(&self) -> Result<Vec<Value>, ApiError> {
        Err(ApiError::NotImplemented("donation requests endpoint"))
    }

    pub async fn create_request(&self, _request: &Value) -> Result<Value, ApiError> {
        Err(ApiError::NotImplemented("create request endpoint"))
    }

    pub async fn send_contact_message(&self, _message: &Value) -> Result<(), ApiError> {
        Err(ApiError::NotImplemented("contact endpoint"))
    }
}

fn apply_search_filters(
    donors: Vec<DonorProfile>,
    search: &DonorSearch,
    now: chrono::DateTime<Utc>,
) -> Vec<DonorProfile> {
    donors
        .into_iter()
        .filter(|donor| {
            if let Some(city) = &search.city {
                let matches = donor
                    .city
                    .as_deref()
                    .is_some_and(|donor_city| donor_city.eq_ignore_ascii_case(city));
                if !matches {
                    return false;
                }
            }
            if search.available_only && !donor.is_eligible(now) {
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn donor(city: &str, last_donation: Option<chrono::DateTime<Utc>>) -> DonorProfile {
        DonorProfile {
            id: None,
            name: "donor".to_string(),
            email: None,
            phone_number: None,
            blood_group: Some(BloodGroup::APositive),
            city: Some(city.to_string()),
            total_donations: None,
            donations: last_donation
                .map(|date| {
                    vec![Donation {
                        id: None,
                        date,
                        location: None,
                        notes: None,
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn search_filters_city_and_availability() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).single().expect("date");
        let recent = now - chrono::Duration::days(10);
        let long_ago = now - chrono::Duration::days(90);
        let donors = vec![
            donor("Pune", Some(long_ago)),
            donor("Pune", Some(recent)),
            donor("Madrid", None),
        ];

        let search = DonorSearch {
            blood_group: None,
            city: Some("pune".to_string()),
            available_only: true,
        };
        let filtered = apply_search_filters(donors, &search, now);
        // Only the Pune donor past the donation interval survives.
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].city.as_deref(), Some("Pune"));
        assert!(filtered[0].is_eligible(now));
    }

    #[test]
    fn availability_filter_keeps_never_donated() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).single().expect("date");
        let donors = vec![donor("Pune", None)];
        let search = DonorSearch {
            available_only: true,
            ..DonorSearch::default()
        };
        assert_eq!(apply_search_filters(donors, &search, now).len(), 1);
    }

    #[tokio::test]
    async fn unimplemented_endpoints_fail_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let credentials = crate::credentials::CredentialStore::new(dir.path()).expect("store");
        // Deliberately unroutable: these calls must fail before any I/O.
        let http = HttpClient::new("http://127.0.0.1:1", credentials, None).expect("client");
        let api = DonorApi::new(
            http,
            TtlCache::new(),
            RefreshBus::new(),
            &ClientConfig::default(),
        );

        assert!(matches!(
            api.donation_requests().await,
            Err(ApiError::NotImplemented(_))
        ));
        let donation = Donation {
            id: None,
            date: Utc::now(),
            location: None,
            notes: None,
        };
        let err = api.create_donation(&donation).await.expect_err("fail fast");
        assert!(err.to_string().contains("not yet implemented"));
    }
}
