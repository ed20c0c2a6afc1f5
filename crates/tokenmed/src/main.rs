use std::env;
use std::future::Future;

mod logging;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use textwrap::wrap;
use tokenmed_core::auth::ephemeral::ERROR_MESSAGE_KEY;
use tokenmed_core::auth::{
    AuthError, AuthSession, EphemeralStore, FileEphemeralStore, HttpAuthTransport, LoginFlow,
    SessionContext, SessionIdentity,
};
use tokenmed_core::config::{
    GitlabEndpoints, MediatorEndpoints, DEFAULT_API_BASE, DEFAULT_GITLAB_BASE,
};
use tokenmed_core::gitlab::{GitlabClient, Group, UserGroups};
use tokenmed_core::services::{
    Activity, ActivityService, GroupService, ProfileService, ServiceError,
};
use tokio::task;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_PROFILE: &str = "default";

#[derive(Parser, Debug)]
#[command(author, version, about = "GitLab dashboard through a token mediating back-end")]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in through the token mediator using OAuth with PKCE
    Login(LoginArgs),
    /// End the session on the token mediator
    Logout,
    /// Show the signed-in user's profile
    Profile(OutputArgs),
    /// Show recent GitLab activity
    Activity(OutputArgs),
    /// Show the first groups and their projects
    Groups(OutputArgs),
    /// Profile, groups and activity in one session
    Dashboard(DashboardArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Print the authorization URL instead of launching a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DashboardArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
    /// Log out once everything is shown
    #[arg(long)]
    logout: bool,
}

/// Everything a command needs, wired once per process.
struct App {
    session: AuthSession,
    gitlab: GitlabClient,
    storage: FileEphemeralStore,
    open_browser: bool,
}

impl App {
    fn from_env() -> Result<Self> {
        let api_base = env_or_default("TOKENMED_API_BASE", DEFAULT_API_BASE);
        let gitlab_base = env_or_default("TOKENMED_GITLAB_URL", DEFAULT_GITLAB_BASE);
        let open_browser = env::var("TOKENMED_NO_BROWSER")
            .map(|value| value.trim().is_empty())
            .unwrap_or(true);
        debug!(%api_base, %gitlab_base, open_browser, "configuration loaded");

        let mediator =
            MediatorEndpoints::from_base(&api_base).context("invalid TOKENMED_API_BASE")?;
        let gitlab_endpoints =
            GitlabEndpoints::from_base(&gitlab_base).context("invalid TOKENMED_GITLAB_URL")?;

        let context = SessionContext::in_memory();
        let transport =
            HttpAuthTransport::new(mediator).context("failed to build token mediator client")?;
        let gitlab = GitlabClient::new(gitlab_endpoints, context.tokens().clone())
            .context("failed to build GitLab client")?;
        let storage = FileEphemeralStore::with_default_locator(DEFAULT_PROFILE)
            .context("unable to initialise ephemeral store")?;

        Ok(Self {
            session: AuthSession::new(std::sync::Arc::new(transport), context),
            gitlab,
            storage,
            open_browser,
        })
    }

    fn profiles(&self) -> ProfileService {
        ProfileService::new(self.session.clone(), self.gitlab.clone())
    }

    fn activities(&self) -> ActivityService {
        ActivityService::new(self.session.clone(), self.gitlab.clone())
    }

    fn groups(&self) -> GroupService {
        GroupService::new(self.session.clone(), self.gitlab.clone())
    }

    /// Show and forget the message left behind by a failed run.
    fn report_previous_error(&self) {
        match self.storage.take(ERROR_MESSAGE_KEY) {
            Ok(Some(message)) => {
                for line in wrap(&format!("Previous run failed: {message}"), 80) {
                    eprintln!("{line}");
                }
                eprintln!();
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not read stored error message"),
        }
    }

    fn record_error(&self, message: &str) {
        if let Err(err) = self.storage.set(ERROR_MESSAGE_KEY, message) {
            warn!(error = %err, "could not store error message");
        }
    }

    async fn interactive_login(&self, open_browser: bool) -> Result<SessionIdentity, AuthError> {
        let flow = LoginFlow::new(&self.session, &self.storage);
        match flow
            .run_interactive(open_browser, print_authorization_url, prompt_for_redirect)
            .await
        {
            Err(AuthError::BrowserLaunch(reason)) => {
                eprintln!(
                    "Failed to launch browser ({reason}); falling back to manual copy/paste flow."
                );
                flow.run_interactive(false, print_authorization_url, prompt_for_redirect)
                    .await
            }
            other => other,
        }
    }

    /// Run a service call, logging in first if the mediator has no session.
    async fn with_login<T, F, Fut>(&self, mut load: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match load().await {
            Err(ServiceError::Auth(AuthError::NoSession)) => {
                eprintln!("No active session, starting login.");
                let identity = self
                    .interactive_login(self.open_browser)
                    .await
                    .context("login failed")?;
                println!("Logged in as {}.\n", identity.username);
                Ok(load().await?)
            }
            other => Ok(other?),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_stderr_logging(cli.verbose);

    let app = App::from_env()?;
    app.report_previous_error();

    if let Err(err) = run(&app, cli.command).await {
        app.record_error(&user_message(&err));
        return Err(err);
    }
    Ok(())
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Login(args) => login(app, args).await,
        Commands::Logout => logout(app).await,
        Commands::Profile(args) => profile(app, args).await,
        Commands::Activity(args) => activity(app, args).await,
        Commands::Groups(args) => groups(app, args).await,
        Commands::Dashboard(args) => dashboard(app, args).await,
    }
}

async fn login(app: &App, args: LoginArgs) -> Result<()> {
    let open_browser = app.open_browser && !args.no_browser;
    let identity = app
        .interactive_login(open_browser)
        .await
        .context("login failed")?;

    println!("Login succeeded.");
    if !identity.username.is_empty() {
        println!("Logged in as {} ({}).", identity.name, identity.username);
    }
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    app.session
        .terminate()
        .await
        .context("logout failed, local session cleared")?;
    println!("Logged out.");
    Ok(())
}

async fn profile(app: &App, args: OutputArgs) -> Result<()> {
    let service = app.profiles();
    let identity = app.with_login(|| service.load_profile()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&identity)?);
    } else {
        render_identity(&identity);
    }
    Ok(())
}

async fn activity(app: &App, args: OutputArgs) -> Result<()> {
    let service = app.activities();
    let activities = app.with_login(|| service.activities()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&activities)?);
    } else {
        render_activities(&activities);
    }
    Ok(())
}

async fn groups(app: &App, args: OutputArgs) -> Result<()> {
    let service = app.groups();
    let groups = app.with_login(|| service.group_data()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else {
        render_groups(&groups);
    }
    Ok(())
}

async fn dashboard(app: &App, args: DashboardArgs) -> Result<()> {
    let profiles = app.profiles();
    let identity = app.with_login(|| profiles.load_profile()).await?;
    let groups = app
        .groups()
        .group_data()
        .await
        .context("failed to load groups")?;
    let activities = app
        .activities()
        .activities()
        .await
        .context("failed to load activity")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "profile": identity,
                "groups": groups,
                "activities": activities,
            }))?
        );
    } else {
        render_identity(&identity);
        println!();
        render_groups(&groups);
        println!();
        render_activities(&activities);
    }

    if args.logout {
        logout(app).await?;
    }
    Ok(())
}

fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_owned(),
        _ => default.to_owned(),
    }
}

/// Short message for the user, also kept for the next run.
fn user_message(err: &anyhow::Error) -> String {
    let requires_login = err.chain().any(|cause| {
        cause
            .downcast_ref::<ServiceError>()
            .is_some_and(ServiceError::requires_login)
            || auth_cause(cause).is_some_and(AuthError::requires_login)
    });
    if requires_login {
        return "Your session has expired. Run `tokenmed login` to sign in again.".to_owned();
    }

    let fault = err.chain().find_map(|cause| match auth_cause(cause) {
        Some(AuthError::ServerFault(kind)) => Some(format!("Login is unavailable: {kind}.")),
        Some(AuthError::BadRequest) => {
            Some("The request did not fulfill the server requirements.".to_owned())
        }
        _ => None,
    });
    fault.unwrap_or_else(|| format!("{err:#}"))
}

fn auth_cause<'a>(cause: &'a (dyn std::error::Error + 'static)) -> Option<&'a AuthError> {
    match cause.downcast_ref::<ServiceError>() {
        Some(ServiceError::Auth(err)) => Some(err),
        _ => cause.downcast_ref::<AuthError>(),
    }
}

async fn prompt_for_redirect() -> Result<String, AuthError> {
    task::spawn_blocking(|| {
        use std::io::{self, Write};
        print!("Paste the redirect URL from your browser: ");
        io::stdout().flush().map_err(AuthError::Io)?;
        let mut input = String::new();
        io::stdin().read_line(&mut input).map_err(AuthError::Io)?;
        Ok(input.trim().to_owned())
    })
    .await
    .map_err(|_| AuthError::Cancelled)?
}

fn print_authorization_url(url: &Url) -> Result<(), AuthError> {
    println!("\nAuthorize the application by visiting:\n  {}\n", url);
    Ok(())
}

fn render_identity(identity: &SessionIdentity) {
    println!("User ID   : {}", identity.user_id);
    println!("Name      : {}", identity.name);
    println!("Username  : {}", identity.username);
    if !identity.primary_email.is_empty() {
        println!("Email     : {}", identity.primary_email);
    }
    if !identity.avatar.is_empty() {
        println!("Avatar    : {}", identity.avatar);
    }
    if !identity.last_activity_on.is_empty() {
        println!("Active on : {}", identity.last_activity_on);
    }
}

fn render_activities(activities: &[Activity]) {
    println!("{:<17} {:<20} {:<14} {:<40}", "WHEN", "ACTION", "TYPE", "TARGET");
    println!("{}", "-".repeat(94));
    for activity in activities {
        let when = activity
            .created_at
            .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<17} {:<20} {:<14} {:<40}",
            when,
            truncate(&activity.action_name, 20),
            truncate(&activity.target_type, 14),
            truncate(&activity.target_title, 40)
        );
    }
}

fn render_groups(data: &UserGroups) {
    println!(
        "Showing {} of {} groups",
        data.groups.len(),
        data.group_count
    );
    for group in &data.groups {
        render_group(group);
    }
}

fn render_group(group: &Group) {
    println!();
    println!("{} ({} projects)", group.full_path, group.projects_count);
    println!("  {}", group.web_url);
    for project in &group.projects {
        let commit = project
            .last_commit
            .as_ref()
            .map(|commit| {
                let author = commit
                    .author_username
                    .as_deref()
                    .or(commit.author_name.as_deref())
                    .unwrap_or("unknown");
                match commit.committed_date {
                    Some(date) => format!(
                        "last commit by {author} on {}",
                        date.with_timezone(&Local).format("%Y-%m-%d")
                    ),
                    None => format!("last commit by {author}"),
                }
            })
            .unwrap_or_else(|| "no commits".into());
        println!("  - {:<32} {}", truncate(&project.name, 32), commit);
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    let mut chars = value.chars();
    let mut collected = String::new();
    for _ in 0..max_len.saturating_sub(1) {
        match chars.next() {
            Some(ch) => collected.push(ch),
            None => return value.to_owned(),
        }
    }
    if chars.next().is_some() {
        collected.push('…');
        collected
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenmed_core::auth::FaultKind;
    use tokenmed_core::gitlab::GitlabError;

    #[test]
    fn expired_sessions_ask_for_login() {
        let err = anyhow::Error::new(ServiceError::DownstreamAuth(GitlabError::Unauthorized))
            .context("failed to load groups");
        assert!(user_message(&err).contains("tokenmed login"));

        let err = anyhow::Error::new(AuthError::ReloginRequired);
        assert!(user_message(&err).contains("tokenmed login"));
    }

    #[test]
    fn server_faults_are_explained() {
        let err = anyhow::Error::new(AuthError::ServerFault(FaultKind::Internal))
            .context("login failed");
        assert_eq!(
            user_message(&err),
            "Login is unavailable: the server had a problem."
        );

        let err = anyhow::Error::new(ServiceError::Auth(AuthError::ServerFault(
            FaultKind::MalformedResponse,
        )));
        assert_eq!(
            user_message(&err),
            "Login is unavailable: the server did not respond as expected."
        );
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
