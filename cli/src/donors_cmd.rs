use chrono::Utc;
use hemolink_core::BloodGroup;
use hemolink_core::DonorApi;
use hemolink_core::DonorSearch;
use owo_colors::OwoColorize;

pub async fn run(
    api: &DonorApi,
    blood_group: Option<String>,
    city: Option<String>,
    available: bool,
) -> anyhow::Result<()> {
    let blood_group = match blood_group {
        Some(raw) => match raw.parse::<BloodGroup>() {
            Ok(group) => Some(group),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(2);
            }
        },
        None => None,
    };

    let search = DonorSearch {
        blood_group,
        city,
        available_only: available,
    };
    let donors = match api.search_donors(&search).await {
        Ok(donors) => donors,
        Err(err) => {
            eprintln!("Error searching donors: {err}");
            std::process::exit(1);
        }
    };

    if donors.is_empty() {
        println!("No donors found");
        return Ok(());
    }

    let now = Utc::now();
    for donor in &donors {
        let eligibility = if donor.is_eligible(now) {
            "available".green().to_string()
        } else {
            "cooldown".yellow().to_string()
        };
        println!(
            "{:<24} {:<4} {:<16} [{eligibility}]",
            donor.name,
            donor.blood_group_display(),
            donor.city.as_deref().unwrap_or("-"),
        );
    }
    println!("{} donor(s)", donors.len());
    Ok(())
}
