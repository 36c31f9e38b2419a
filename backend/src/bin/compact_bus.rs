//! Compact one or more bus topics in the PostgreSQL log.
//!
//! Run periodically (for example from cron) against the credential topic so
//! superseded and tombstoned credentials do not linger.

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::DefaultClock;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use telematics_backend::domain::ports::Topic;
use telematics_backend::outbound::bus::PostgresMessageBus;
use telematics_backend::outbound::persistence::{DbPool, PoolConfig};

#[derive(Debug, Parser)]
#[command(name = "compact-bus", about = "Compact keyed topics in the bus log")]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(long, env = "DEVICES_DATABASE_URL")]
    database_url: String,
    /// Topic names to compact; defaults to the credential topic.
    #[arg(long = "topic")]
    topics: Vec<String>,
}

fn resolve_topics(names: &[String]) -> Result<Vec<Topic>> {
    if names.is_empty() {
        return Ok(vec![Topic::TaskCredential]);
    }
    names
        .iter()
        .map(|name| Topic::from_name(name).ok_or_else(|| eyre!("unknown topic {name}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt().with_env_filter(EnvFilter::from_default_env()).try_init() {
        warn!(error = %e, "tracing init failed");
    }

    let cli = Cli::parse();
    let topics = resolve_topics(&cli.topics)?;
    let pool = DbPool::new(PoolConfig::new(cli.database_url).with_max_size(1).with_min_idle(None))
        .await
        .wrap_err("failed to build database pool")?;
    let bus = PostgresMessageBus::new(pool, Arc::new(DefaultClock));

    let mut total = 0;
    for topic in topics {
        total += bus
            .compact(topic)
            .await
            .wrap_err_with(|| format!("failed to compact {topic}"))?;
    }
    info!(removed = total, "compaction finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_to_the_credential_topic() {
        assert_eq!(resolve_topics(&[]).expect("topics"), vec![Topic::TaskCredential]);
    }

    #[rstest]
    fn rejects_unknown_topic_names() {
        assert!(resolve_topics(&["topic.nope".to_owned()]).is_err());
        assert_eq!(
            resolve_topics(&["topic.event".to_owned()]).expect("topics"),
            vec![Topic::DomainEvents]
        );
    }
}
