//! Current user and chat availability

use anyhow::Result;

use super::client::BackendClient;
use crate::store::IdentityProvider;

/// Fetch and display the signed-in user's profile and role.
pub async fn whoami() -> Result<()> {
    let client = BackendClient::new().await?;
    let identity = client.current_user().await?;

    println!();
    match identity {
        Some(identity) => {
            println!("Display Name: {}", identity.display_name);
            println!("Role:         {}", identity.role.as_str());
            println!("ID:           {}", identity.user_id);
            if let Some(avatar) = identity.avatar_url.as_deref() {
                println!("Avatar:       {}", avatar);
            }
            println!(
                "Team chat:    {}",
                if identity.role.can_open_chat() {
                    "available"
                } else {
                    "not available"
                }
            );
        }
        None => println!("Not logged in."),
    }

    Ok(())
}
