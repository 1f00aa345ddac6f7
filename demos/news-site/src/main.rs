//! A small news site on top of Newsgate.
//!
//! ```text
//! cargo run -p news-site -- [config.json]
//! ```
//!
//! Seeds three accounts (`editor`, `writer`, `reader`, password equal to
//! the user name). Sign in, open a circuit, then rotate a user's stamp
//! with `NEWS_SITE_ROTATE_AFTER_SECS` set to watch revalidation end the
//! session.

use std::time::Duration;

use newsgate::config::ServerConfig;
use newsgate::prelude::*;
use newsgate::telemetry;

const ROTATE_AFTER: &str = "NEWS_SITE_ROTATE_AFTER_SECS";

/// `(user name, role)`; each password is the user name.
const ACCOUNTS: &[(&str, &str)] = &[
    ("editor", "admin"),
    ("writer", "writer"),
    ("reader", "reader"),
];

async fn seed(store: &InMemoryStore) -> Result<Vec<CredentialRecord>, StoreError> {
    let mut records = Vec::with_capacity(ACCOUNTS.len());
    for (user_name, role) in ACCOUNTS {
        let record = store
            .add_user(NewUser::new(*user_name).password(*user_name).role(*role))
            .await?;
        tracing::info!(user_name, role, user_id = %record.id, "seeded account");
        records.push(record);
    }
    Ok(records)
}

fn load_config() -> Result<ServerConfig, NewsgateError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    Ok(config.with_env()?)
}

/// Rotates every seeded user's stamp once, after `delay`.
fn schedule_rotation(store: InMemoryStore, users: Vec<UserId>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        for user_id in users {
            match store.update_security_stamp(&user_id).await {
                Ok(_) => tracing::info!(%user_id, "security stamp rotated"),
                Err(e) => tracing::warn!(%user_id, error = %e, "cannot rotate stamp"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), NewsgateError> {
    telemetry::init();

    let config = load_config()?;
    let store = InMemoryStore::new();
    let records = seed(&store).await?;

    if let Some(secs) = std::env::var(ROTATE_AFTER)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
    {
        let users = records.into_iter().map(|r| r.id).collect();
        schedule_rotation(store.clone(), users, Duration::from_secs(secs));
    }

    let server = NewsgateServerBuilder::new().config(config).build(store).await?;
    server.run().await
}
