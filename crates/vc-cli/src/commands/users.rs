//! VPN user management commands

use anyhow::Result;

use vc_core::types::HostRole;
use vc_provision::{CredentialError, CredentialStore};

use super::context::{release, CommandContext};
use crate::output::{format_users, print_info, print_success, print_warning};

/// Operation on one host's user list
#[derive(Debug, Clone)]
pub enum UserAction {
    List,
    Add {
        username: String,
        password: Option<String>,
    },
    Remove {
        username: String,
    },
    Show {
        username: String,
    },
}

/// Run a user operation against one host, always closing the session
pub async fn users_command(ctx: &CommandContext, role: HostRole, action: UserAction) -> Result<()> {
    let session = ctx.connect(role).await?;
    let store = CredentialStore::new(&session);
    let result = run(&store, role, action).await;
    release(&session).await;
    result
}

async fn run<E>(store: &CredentialStore<'_, E>, role: HostRole, action: UserAction) -> Result<()>
where
    E: vc_core::traits::RemoteExecutor + ?Sized,
{
    match action {
        UserAction::List => {
            let users = store.list().await?;
            println!("VPN users on {} host:", role);
            println!("{}", format_users(&users));
        }

        UserAction::Add { username, password } => {
            match store.add(&username, password.as_deref()).await {
                Ok(password) => {
                    print_success(&format!("Added user '{}' on {} host", username, role));
                    println!("  Username: {}", username);
                    println!("  Password: {}", password);
                }
                Err(CredentialError::DuplicateUser(name)) => {
                    print_warning(&format!("User '{}' already exists on {} host", name, role));
                    print_info(&format!("Show its password with 'vpn-chain users show {}'", name));
                    anyhow::bail!("duplicate user '{}'", name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        UserAction::Remove { username } => {
            store.remove(&username).await?;
            print_success(&format!("Removed user '{}' from {} host", username, role));
        }

        UserAction::Show { username } => {
            let password = store.password(&username).await?;
            println!("  Username: {}", username);
            println!("  Password: {}", password);
        }
    }
    Ok(())
}
