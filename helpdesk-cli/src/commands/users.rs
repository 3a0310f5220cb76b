use std::fmt::Write as _;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use rpassword::prompt_password;
use shared::{
    config::ClientConfig,
    models::{CreateUserRequest, Role, UserId, UserPage, UserQuery},
};

use super::session::SessionContext;

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    /// List accounts
    List(UserListArgs),
    /// Create an account; the password is prompted for
    Add(AddUserArgs),
    /// Delete an account
    Delete {
        /// Account identifier
        id: UserId,
    },
}

#[derive(Args, Debug)]
pub struct UserListArgs {
    #[arg(long, default_value_t = 0, help = "Zero-based page number")]
    pub page: u32,

    #[arg(long, short, default_value_t = 10, help = "Accounts per page")]
    pub size: u32,

    #[arg(long, default_value = "id", help = "Field to sort by")]
    pub sort_by: String,

    #[arg(long, default_value = "asc", help = "Sort direction (asc or desc)")]
    pub sort_dir: String,
}

#[derive(Args, Debug)]
pub struct AddUserArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub first_name: String,

    #[arg(long)]
    pub last_name: String,

    #[arg(long, default_value = "user", value_parser = parse_role, help = "Account role (user or admin)")]
    pub role: Role,
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::try_from(value).map_err(|_| format!("unknown role `{value}` (expected user or admin)"))
}

pub async fn run(config: &ClientConfig, command: UsersCommand) -> Result<()> {
    let session = SessionContext::restore(config)?;
    if session.viewer().role != Role::Admin {
        bail!("user management needs an administrator session");
    }

    let outcome = match command {
        UsersCommand::List(args) => list(&session, args).await,
        UsersCommand::Add(args) => add(&session, args).await,
        UsersCommand::Delete { id } => delete(&session, id).await,
    };
    session.persist();
    outcome
}

async fn list(session: &SessionContext, args: UserListArgs) -> Result<()> {
    let query = UserQuery {
        page: args.page,
        size: args.size,
        sort_by: args.sort_by,
        sort_dir: args.sort_dir,
    };
    let page = session
        .client
        .list_users(&query)
        .await
        .context("failed to list users")?;
    print!("{}", render_users(&page));
    Ok(())
}

async fn add(session: &SessionContext, args: AddUserArgs) -> Result<()> {
    let password = prompt_password("Password for the new account: ")?;
    if password.trim().is_empty() {
        bail!("password must not be empty");
    }
    let request = CreateUserRequest {
        email: args.email,
        password,
        first_name: args.first_name,
        last_name: args.last_name,
        role: args.role,
    };
    session
        .client
        .add_user(&request)
        .await
        .context("failed to create user")?;
    println!("Created {} account for {}", request.role, request.email);
    Ok(())
}

async fn delete(session: &SessionContext, id: UserId) -> Result<()> {
    if id == session.profile.id {
        bail!("refusing to delete the signed-in account");
    }
    session
        .client
        .delete_user(id)
        .await
        .with_context(|| format!("failed to delete user {id}"))?;
    println!("Deleted user {id}");
    Ok(())
}

fn render_users(page: &UserPage) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Users: page {} of {} ({} total)",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements
    );
    for user in &page.content {
        let name = [user.first_name.as_deref(), user.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            "  {:<6} {:<6} {:<32} {name}",
            user.id,
            user.role.to_string(),
            user.email
        );
    }
    out
}
