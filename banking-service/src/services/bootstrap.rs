//! Opt-in demo data for local development.

use secrecy::{ExposeSecret, SecretString};

use super::store::Store;
use crate::models::{Account, Identity, Role};
use crate::utils::{hash_password, Password};

pub const DEMO_SUPER_ADMIN_EMAIL: &str = "superadmin@bank.local";
pub const DEMO_ADMIN_EMAIL: &str = "admin@bank.local";
pub const DEMO_CLIENT_EMAILS: [&str; 2] = ["alice@bank.local", "bob@bank.local"];

const DEMO_OPENING_BALANCE: i64 = 100_000;

/// Seed one super admin, one admin and two clients with an account each.
/// Does nothing when the super admin already exists.
pub async fn seed_demo_data(store: &dyn Store, password: &SecretString) -> anyhow::Result<()> {
    if store
        .find_identity_by_email(DEMO_SUPER_ADMIN_EMAIL)
        .await?
        .is_some()
    {
        tracing::info!("Demo data already present, skipping seed");
        return Ok(());
    }

    let hash = hash_password(&Password::new(password.expose_secret().to_string()))?.into_string();

    store
        .insert_identity(&Identity::new(
            DEMO_SUPER_ADMIN_EMAIL.to_string(),
            hash.clone(),
            Role::SuperAdmin,
        ))
        .await?;
    store
        .insert_identity(&Identity::new(
            DEMO_ADMIN_EMAIL.to_string(),
            hash.clone(),
            Role::Admin,
        ))
        .await?;

    for (index, email) in DEMO_CLIENT_EMAILS.iter().enumerate() {
        let client = Identity::new(email.to_string(), hash.clone(), Role::Client);
        store.insert_identity(&client).await?;
        store
            .insert_account(&Account::new(
                client.identity_id,
                format!("DEMO-{:04}", index + 1),
                "USD",
                DEMO_OPENING_BALANCE,
            ))
            .await?;
    }

    tracing::info!(
        clients = DEMO_CLIENT_EMAILS.len(),
        "Seeded demo identities and accounts"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;
    use crate::services::store::{AccountStore, IdentityStore};

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let password = SecretString::new("demo-password-123".to_string());

        seed_demo_data(&store, &password).await.unwrap();
        seed_demo_data(&store, &password).await.unwrap();

        let alice = store
            .find_identity_by_email("alice@bank.local")
            .await
            .unwrap()
            .unwrap();
        let accounts = store.list_accounts_for_owner(alice.identity_id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].balance, DEMO_OPENING_BALANCE);

        let admin = store
            .find_identity_by_email(DEMO_ADMIN_EMAIL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
    }
}
