use std::{
    env, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use client::{HelpDeskClient, TicketApi, push::Connector, stomp::StompConnector};
use directories::BaseDirs;
use reqwest::cookie::{CookieStore, Jar};
use rpassword::prompt_password;
use shared::{
    config::ClientConfig,
    models::{LoginRequest, Profile, ProfileUpdate, Viewer},
};
use url::Url;

const COOKIE_FILE: &str = "session.cookies";
const PROFILE_FILE: &str = "profile.json";

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Sign in and store the session cookies and profile
    Login,
    /// Sign out and forget the stored session
    Logout,
    /// Check the stored session against the server
    Me,
    /// Update the signed-in account's profile
    Update(ProfileArgs),
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[arg(long, help = "New e-mail address")]
    pub email: Option<String>,

    #[arg(long, help = "New first name")]
    pub first_name: Option<String>,

    #[arg(long, help = "New last name")]
    pub last_name: Option<String>,

    #[arg(long, help = "Prompt for a new password")]
    pub password: bool,
}

pub async fn run(config: &ClientConfig, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Login => login(config).await,
        SessionCommand::Logout => logout(config).await,
        SessionCommand::Me => me(config).await,
        SessionCommand::Update(args) => update(config, args).await,
    }
}

/// A restored session: the cookie-carrying client plus the stored profile
/// the [`Viewer`] is derived from.
pub struct SessionContext {
    pub client: HelpDeskClient,
    pub profile: Profile,
    dir: PathBuf,
}

impl SessionContext {
    /// Restore the session saved by `helpdesk session login`.
    pub fn restore(config: &ClientConfig) -> Result<Self> {
        let dir = session_dir();
        let jar = load_cookie_jar(&config.api_base_url, &dir.join(COOKIE_FILE)).with_context(
            || {
                format!(
                    "no active session found in {}; run `helpdesk session login` first",
                    dir.display()
                )
            },
        )?;
        let profile = load_profile(&dir.join(PROFILE_FILE))?;
        let client = HelpDeskClient::with_jar(config.api_base_url.clone(), jar)?;
        Ok(Self {
            client,
            profile,
            dir,
        })
    }

    pub const fn viewer(&self) -> Viewer {
        self.profile.viewer()
    }

    pub fn api(&self) -> Arc<dyn TicketApi> {
        Arc::new(self.client.clone())
    }

    /// Broker connector carrying the session cookie on the upgrade request.
    pub fn connector(&self, config: &ClientConfig) -> Arc<dyn Connector> {
        let connector = StompConnector::new(config.ws_url.clone());
        let cookie = self
            .client
            .jar()
            .cookies(self.client.base_url())
            .and_then(|value| value.to_str().ok().map(str::to_string));
        match cookie {
            Some(cookie) => Arc::new(connector.with_cookie(cookie)),
            None => Arc::new(connector),
        }
    }

    /// Write back cookies the server may have rotated during the command.
    pub fn persist(&self) {
        let path = self.dir.join(COOKIE_FILE);
        if let Err(err) = persist_cookie_jar(self.client.jar(), self.client.base_url(), &path) {
            eprintln!("warning: {err:#}");
        }
    }
}

pub async fn login(config: &ClientConfig) -> Result<()> {
    let dir = session_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create session directory {}", dir.display()))?;

    let email = prompt("Email: ")?;
    let password = prompt_password("Password: ")?;
    if password.trim().is_empty() {
        bail!("password must not be empty");
    }

    let client = HelpDeskClient::new(config.api_base_url.clone())?;
    let profile = client
        .login(&LoginRequest {
            email,
            password,
            remember_me: true,
        })
        .await
        .context("login failed")?;

    persist_cookie_jar(client.jar(), client.base_url(), &dir.join(COOKIE_FILE))?;
    store_profile(&profile, &dir.join(PROFILE_FILE))?;
    print_profile(&profile, &dir);
    Ok(())
}

pub async fn me(config: &ClientConfig) -> Result<()> {
    let session = SessionContext::restore(config)?;
    if !session.client.verify().await? {
        bail!("session expired. run `helpdesk session login` to sign in again");
    }
    session.persist();
    print_profile(&session.profile, &session.dir);
    Ok(())
}

pub async fn update(config: &ClientConfig, args: ProfileArgs) -> Result<()> {
    let session = SessionContext::restore(config)?;
    let password = if args.password {
        let password = prompt_password("New password: ")?;
        if password.trim().is_empty() {
            bail!("password must not be empty");
        }
        Some(password)
    } else {
        None
    };
    let update = ProfileUpdate {
        email: args.email,
        first_name: args.first_name,
        last_name: args.last_name,
        password,
    };
    if update == ProfileUpdate::default() {
        bail!("nothing to update; pass --email, --first-name, --last-name or --password");
    }

    let profile = session
        .client
        .update_profile(&update)
        .await
        .context("profile update failed")?;
    store_profile(&profile, &session.dir.join(PROFILE_FILE))?;
    session.persist();
    println!("Profile updated for {}", profile.display_name());
    Ok(())
}

pub async fn logout(config: &ClientConfig) -> Result<()> {
    let dir = session_dir();

    match SessionContext::restore(config) {
        Ok(session) => {
            if let Err(err) = session.client.logout().await {
                eprintln!("warning: logout request failed: {err}");
            }
        }
        Err(err) => eprintln!("warning: {err:#}"),
    }

    let mut removed = false;
    for file in [COOKIE_FILE, PROFILE_FILE] {
        let path = dir.join(file);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed = true;
        }
    }
    if removed {
        println!("Removed stored session at {}", dir.display());
    } else {
        println!("No stored session found at {}", dir.display());
    }
    Ok(())
}

/// Directory holding the cookie jar and profile. `HELPDESK_SESSION_DIR`
/// overrides the platform config directory.
pub fn session_dir() -> PathBuf {
    if let Some(dir) = env::var_os("HELPDESK_SESSION_DIR") {
        return PathBuf::from(dir);
    }
    BaseDirs::new().map_or_else(
        || PathBuf::from("./.helpdesk"),
        |dirs| dirs.config_dir().join("helpdesk"),
    )
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush().ok();
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim().to_string();
    if trimmed.is_empty() {
        bail!("input must not be empty");
    }
    Ok(trimmed)
}

pub fn load_cookie_jar(origin: &Url, path: &Path) -> Result<Arc<Jar>> {
    if !path.exists() {
        bail!("session cookie jar not found at {}", path.display());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read session jar {}", path.display()))?;
    let jar = Arc::new(Jar::default());
    for entry in contents.split(';') {
        let cookie = entry.trim();
        if !cookie.is_empty() {
            jar.add_cookie_str(cookie, origin);
        }
    }
    Ok(jar)
}

pub fn persist_cookie_jar(jar: &Jar, origin: &Url, path: &Path) -> Result<()> {
    if let Some(header) = jar.cookies(origin) {
        write_private(path, header.to_str()?.as_bytes())?;
    } else if path.exists() {
        fs::remove_file(path).ok();
    }
    Ok(())
}

fn load_profile(path: &Path) -> Result<Profile> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!(
            "stored profile missing at {}; run `helpdesk session login` again",
            path.display()
        )
    })?;
    serde_json::from_str(&contents)
        .with_context(|| format!("stored profile at {} is corrupt", path.display()))
}

fn store_profile(profile: &Profile, path: &Path) -> Result<()> {
    write_private(path, &serde_json::to_vec_pretty(profile)?)
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

fn print_profile(profile: &Profile, dir: &Path) {
    println!("Logged in as {} <{}>", profile.display_name(), profile.email);
    println!("role: {}", profile.role);
    println!("session stored in {}", dir.display());
}
