use hemolink_core::DonorApi;

pub async fn run_login(api: &DonorApi, username: Option<String>) -> anyhow::Result<()> {
    let username = match username {
        Some(username) => username,
        None => inquire::Text::new("Email or phone number:").prompt()?,
    };
    let password = inquire::Password::new("Password:")
        .without_confirmation()
        .prompt()?;

    match api.login(&username, &password).await {
        Ok(()) => {
            eprintln!("Successfully logged in");
            Ok(())
        }
        Err(err) => {
            eprintln!("Error logging in: {err}");
            std::process::exit(1);
        }
    }
}

pub async fn run_logout(api: &DonorApi) -> anyhow::Result<()> {
    let was_logged_in = api.http().credentials().is_logged_in();
    api.logout().await;
    if was_logged_in {
        eprintln!("Successfully logged out");
    } else {
        eprintln!("Not logged in");
    }
    Ok(())
}
