use chrono::DateTime;
use chrono::Datelike;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Minimum days between whole-blood donations. Used both for the donor
/// availability filter and the "next eligible" display; the duplication is
/// intentional policy, the two must never diverge.
pub const DONATION_INTERVAL_DAYS: i64 = 56;

/// Blood types with fewer registered donors than this are flagged as
/// urgent needs.
pub const URGENT_NEED_THRESHOLD: u32 = 5;

/// ABO/Rh groups in the display order used throughout the platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum BloodGroup {
    #[serde(rename = "O-")]
    ONegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "AB+")]
    AbPositive,
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::ONegative,
        BloodGroup::OPositive,
        BloodGroup::ANegative,
        BloodGroup::APositive,
        BloodGroup::BNegative,
        BloodGroup::BPositive,
        BloodGroup::AbNegative,
        BloodGroup::AbPositive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodGroup::ONegative => "O-",
            BloodGroup::OPositive => "O+",
            BloodGroup::ANegative => "A-",
            BloodGroup::APositive => "A+",
            BloodGroup::BNegative => "B-",
            BloodGroup::BPositive => "B+",
            BloodGroup::AbNegative => "AB-",
            BloodGroup::AbPositive => "AB+",
        }
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown blood group: {0}")]
pub struct ParseBloodGroupError(String);

impl FromStr for BloodGroup {
    type Err = ParseBloodGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BloodGroup::ALL
            .into_iter()
            .find(|group| group.as_str() == normalized)
            .ok_or_else(|| ParseBloodGroupError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Current-user profile as served by `/users/me/profile`. The backend has
/// shipped both `blood_type` and `bloodType` over time; the alias keeps old
/// payloads parseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(
        rename = "blood_type",
        alias = "bloodType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub blood_group: Option<BloodGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_donations: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub donations: Vec<Donation>,
}

impl DonorProfile {
    /// Most recent donation date, from whichever record carries one.
    pub fn last_donation_date(&self) -> Option<DateTime<Utc>> {
        self.donations.iter().map(|donation| donation.date).max()
    }

    pub fn total_donation_count(&self) -> u64 {
        self.total_donations
            .unwrap_or(self.donations.len() as u64)
    }

    /// Whether the donor may donate again at `now` under the standard
    /// interval rule. Donors with no recorded donation are eligible.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.last_donation_date() {
            Some(last) => now >= next_eligible_date(last),
            None => true,
        }
    }

    pub fn blood_group_display(&self) -> &str {
        self.blood_group
            .as_ref()
            .map(BloodGroup::as_str)
            .unwrap_or("Not specified")
    }
}

/// Earliest date a donor may give again after donating on `last`.
pub fn next_eligible_date(last: DateTime<Utc>) -> DateTime<Utc> {
    last + chrono::Duration::days(DONATION_INTERVAL_DAYS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodDrive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
}

/// Aggregate inventory view computed client-side from the full user list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BloodBankStats {
    pub current_inventory: BTreeMap<BloodGroup, u32>,
    pub urgent_needs: Vec<BloodGroup>,
    pub total_community_donations: u64,
    pub donations_this_month: u64,
    pub total_registered_donors: u64,
}

/// Folds a donor list into inventory counts, urgent needs and community
/// totals. Every known blood type appears in the inventory, zero counts
/// included, so the urgent-needs rule sees types nobody has registered for.
pub fn aggregate_blood_bank_stats(donors: &[DonorProfile], now: DateTime<Utc>) -> BloodBankStats {
    let mut inventory: BTreeMap<BloodGroup, u32> = BloodGroup::ALL
        .into_iter()
        .map(|group| (group, 0))
        .collect();
    let mut total_donations = 0u64;
    let mut donations_this_month = 0u64;

    for donor in donors {
        if let Some(group) = donor.blood_group {
            if let Some(count) = inventory.get_mut(&group) {
                *count += 1;
            }
        }
        total_donations += donor.total_donation_count();
        donations_this_month += donor
            .donations
            .iter()
            .filter(|donation| {
                donation.date.year() == now.year() && donation.date.month() == now.month()
            })
            .count() as u64;
    }

    let urgent_needs = BloodGroup::ALL
        .into_iter()
        .filter(|group| inventory.get(group).copied().unwrap_or(0) < URGENT_NEED_THRESHOLD)
        .collect();

    BloodBankStats {
        current_inventory: inventory,
        urgent_needs,
        total_community_donations: total_donations,
        donations_this_month,
        total_registered_donors: donors.len() as u64,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub password: String,
    /// The backend validates that this matches `password`.
    pub confirm_password: String,
    #[serde(
        rename = "blood_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub blood_group: Option<BloodGroup>,
}

impl SignupRequest {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        let password = password.into();
        Self {
            name: name.into(),
            email: email.into(),
            phone_number: None,
            confirm_password: password.clone(),
            password,
            blood_group: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn donor(group: Option<BloodGroup>, donation_dates: &[DateTime<Utc>]) -> DonorProfile {
        DonorProfile {
            id: None,
            name: "donor".to_string(),
            email: None,
            phone_number: None,
            blood_group: group,
            city: None,
            total_donations: None,
            donations: donation_dates
                .iter()
                .map(|date| Donation {
                    id: None,
                    date: *date,
                    location: None,
                    notes: None,
                })
                .collect(),
        }
    }

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn blood_group_parses_and_displays() {
        assert_eq!("ab+".parse::<BloodGroup>(), Ok(BloodGroup::AbPositive));
        assert_eq!(" o- ".parse::<BloodGroup>(), Ok(BloodGroup::ONegative));
        assert!("C+".parse::<BloodGroup>().is_err());
        assert_eq!(BloodGroup::AbNegative.to_string(), "AB-");
    }

    #[test]
    fn blood_type_alias_deserializes() {
        let from_snake: DonorProfile =
            serde_json::from_str(r#"{"name":"a","blood_type":"A+"}"#).expect("parse");
        let from_camel: DonorProfile =
            serde_json::from_str(r#"{"name":"a","bloodType":"A+"}"#).expect("parse");
        assert_eq!(from_snake.blood_group, Some(BloodGroup::APositive));
        assert_eq!(from_camel.blood_group, Some(BloodGroup::APositive));
    }

    #[test]
    fn eligibility_follows_the_interval_rule() {
        let last = at(2026, 1, 1);
        let recent = donor(None, &[last]);
        assert!(!recent.is_eligible(at(2026, 2, 25)));
        assert!(recent.is_eligible(at(2026, 2, 26)));

        let never_donated = donor(None, &[]);
        assert!(never_donated.is_eligible(at(2026, 1, 1)));
    }

    #[test]
    fn next_eligible_is_fifty_six_days_out() {
        let last = at(2026, 3, 1);
        assert_eq!(next_eligible_date(last), at(2026, 4, 26));
    }

    #[test]
    fn aggregation_counts_inventory_and_urgent_needs() {
        let mut donors = Vec::new();
        for _ in 0..6 {
            donors.push(donor(Some(BloodGroup::APositive), &[]));
        }
        for _ in 0..2 {
            donors.push(donor(Some(BloodGroup::ONegative), &[]));
        }
        donors.push(donor(None, &[]));

        let stats = aggregate_blood_bank_stats(&donors, at(2026, 8, 7));
        assert_eq!(stats.current_inventory[&BloodGroup::APositive], 6);
        assert_eq!(stats.current_inventory[&BloodGroup::ONegative], 2);
        assert_eq!(stats.current_inventory[&BloodGroup::BPositive], 0);
        assert_eq!(stats.total_registered_donors, 9);

        // Every type below the threshold is urgent, including those with
        // zero registered donors; A+ (6 donors) is not.
        assert!(!stats.urgent_needs.contains(&BloodGroup::APositive));
        assert!(stats.urgent_needs.contains(&BloodGroup::ONegative));
        assert!(stats.urgent_needs.contains(&BloodGroup::AbNegative));
        assert_eq!(stats.urgent_needs.len(), 7);
    }

    #[test]
    fn aggregation_counts_donations_this_month() {
        let now = at(2026, 8, 7);
        let donors = vec![
            donor(Some(BloodGroup::APositive), &[at(2026, 8, 1), at(2026, 6, 1)]),
            donor(Some(BloodGroup::OPositive), &[at(2026, 8, 3)]),
            donor(Some(BloodGroup::OPositive), &[at(2025, 8, 3)]),
        ];
        let stats = aggregate_blood_bank_stats(&donors, now);
        assert_eq!(stats.donations_this_month, 2);
        assert_eq!(stats.total_community_donations, 4);
    }

    #[test]
    fn explicit_total_donations_wins_over_history_length() {
        let mut profile = donor(None, &[at(2026, 1, 1)]);
        profile.total_donations = Some(12);
        assert_eq!(profile.total_donation_count(), 12);
        profile.total_donations = None;
        assert_eq!(profile.total_donation_count(), 1);
    }
}
