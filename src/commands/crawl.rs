//! Crawl Slack channels into MySQL.

use crate::config::Config;
use crate::error::Result;
use crate::slack::{self, CrawlOptions, CrawlReport, SlackClient};
use crate::store::MySqlStore;

pub async fn run(config: &Config, channels: &[String], days: Option<i64>) -> Result<()> {
    let options = CrawlOptions::from_config(config, channels, days)?;
    let client = SlackClient::from_config(config)?;
    let store = MySqlStore::open(&config.mysql).await?;

    let report = slack::crawl(&store, &client, &options).await;
    store.disconnect().await?;

    print_report(&report?);
    Ok(())
}

fn print_report(report: &CrawlReport) {
    println!("Crawled {} channel(s)", report.channels);
    println!("  messages:   {}", report.messages);
    println!("  mentions:   {}", report.mentions);
    println!("  identities: {}", report.identities);
    println!("  backfilled: {}", report.backfilled);
}
