//! Apply pending schema migrations.

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::store::MySqlStore;

pub async fn run(config: &Config) -> Result<()> {
    let store = MySqlStore::new(&config.mysql);
    let version = store.migrate().await?;
    store.disconnect().await?;

    info!(version, "Schema is current");
    println!("Schema version: {}", version);
    Ok(())
}
