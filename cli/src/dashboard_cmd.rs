use chrono::DateTime;
use chrono::Utc;
use hemolink_core::ClientConfig;
use hemolink_core::DashboardOrchestrator;
use hemolink_core::DashboardSnapshot;
use hemolink_core::DonorApi;
use hemolink_core::SessionState;
use hemolink_core::models::next_eligible_date;
use owo_colors::OwoColorize;

pub async fn run(api: DonorApi, config: &ClientConfig, watch: bool) -> anyhow::Result<()> {
    if !api.http().credentials().is_logged_in() {
        eprintln!("Not logged in. Run `hemolink login` first.");
        std::process::exit(1);
    }

    let mut session = api.http().session_watch();
    let orchestrator = DashboardOrchestrator::new(api, config);
    orchestrator.start().await;

    let snapshot = orchestrator.snapshot();
    if let Some(fatal) = &snapshot.fatal_error {
        eprintln!("{}", fatal.red());
        std::process::exit(1);
    }
    render(&snapshot);

    if !watch {
        orchestrator.shutdown();
        return Ok(());
    }

    eprintln!("{}", "Watching for updates (ctrl-c to quit)".dimmed());
    let mut updates = orchestrator.watch();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow().clone();
                if !snapshot.refreshing && !snapshot.loading {
                    render(&snapshot);
                }
            }
            changed = session.changed() => {
                if changed.is_err() || *session.borrow() == SessionState::LoggedOut {
                    eprintln!("{}", "Session expired. Run `hemolink login` again.".red());
                    break;
                }
            }
        }
    }
    orchestrator.shutdown();
    Ok(())
}

fn render(snapshot: &DashboardSnapshot) {
    if snapshot.partial_data_loaded {
        let failed: Vec<&str> = snapshot
            .failed_sections()
            .iter()
            .map(|section| section.label())
            .collect();
        eprintln!(
            "{}",
            format!("Some sections failed to load: {}", failed.join(", ")).yellow()
        );
    }

    println!("{}", "── Profile ──────────────────────────".bold());
    match (&snapshot.user_data.data, &snapshot.user_data.error) {
        (Some(profile), _) => {
            println!("  {}  ({})", profile.name, profile.blood_group_display());
            println!("  Total donations: {}", profile.total_donation_count());
            let next = profile
                .last_donation_date()
                .map(|last| format_next_eligible(last, Utc::now()))
                .unwrap_or_else(|| "Eligible now".to_string());
            println!("  Next eligible: {next}");
        }
        (None, Some(error)) => println!("  {}", error.red()),
        (None, None) => println!("  (no data)"),
    }

    println!("{}", "── Donation history ─────────────────".bold());
    match (&snapshot.donations.data, &snapshot.donations.error) {
        (Some(donations), _) if donations.is_empty() => println!("  No donations recorded"),
        (Some(donations), _) => {
            for donation in donations {
                let location = donation.location.as_deref().unwrap_or("unknown location");
                println!("  {}  {location}", donation.date.format("%Y-%m-%d"));
            }
        }
        (None, Some(error)) => println!("  {}", error.red()),
        (None, None) => println!("  (no data)"),
    }

    println!("{}", "── Blood bank ───────────────────────".bold());
    match (&snapshot.blood_bank_stats.data, &snapshot.blood_bank_stats.error) {
        (Some(stats), _) => {
            for (group, count) in &stats.current_inventory {
                let marker = if stats.urgent_needs.contains(group) {
                    "needed".red().to_string()
                } else {
                    "ok".green().to_string()
                };
                println!("  {:<4} {count:>3} donors  [{marker}]", group.to_string());
            }
            println!(
                "  {} total donations, {} this month, {} registered donors",
                stats.total_community_donations,
                stats.donations_this_month,
                stats.total_registered_donors
            );
        }
        (None, Some(error)) => println!("  {}", error.red()),
        (None, None) => println!("  (no data)"),
    }

    println!("{}", "── Upcoming drives ──────────────────".bold());
    match (&snapshot.upcoming_drives.data, &snapshot.upcoming_drives.error) {
        (Some(drives), _) if drives.is_empty() => println!("  None scheduled"),
        (Some(drives), _) => {
            for drive in drives {
                let location = drive.location.as_deref().unwrap_or("location TBA");
                println!(
                    "  {}  {}  ({location})",
                    drive.date.format("%Y-%m-%d"),
                    drive.title
                );
            }
        }
        (None, Some(error)) => println!("  {}", error.red()),
        (None, None) => println!("  (no data)"),
    }
}

fn format_next_eligible(last_donation: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let next = next_eligible_date(last_donation);
    if now >= next {
        return "Eligible now".to_string();
    }
    let days = (next - now).num_days().max(1);
    if days < 7 {
        format!("{days} days")
    } else {
        format!("{} weeks", (days as u64).div_ceil(7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn eligible_after_the_interval() {
        assert_eq!(
            format_next_eligible(at(2026, 1, 1), at(2026, 3, 1)),
            "Eligible now"
        );
    }

    #[test]
    fn counts_down_in_days_then_weeks() {
        assert_eq!(format_next_eligible(at(2026, 1, 1), at(2026, 2, 23)), "3 days");
        assert_eq!(
            format_next_eligible(at(2026, 1, 1), at(2026, 1, 5)),
            "8 weeks"
        );
    }
}
