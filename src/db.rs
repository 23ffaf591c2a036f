use std::{future::Future, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    config::{DatabaseConfig, DatabaseKind},
    store::{mariadb::MariaDbStore, mongo::MongoStore, CredentialStore, StoreError, StoreResult},
};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Opens the primary store, retrying while a freshly provisioned container
/// comes up, then prepares its schema.
pub async fn connect(cfg: &DatabaseConfig) -> StoreResult<Arc<dyn CredentialStore>> {
    match cfg.primary {
        DatabaseKind::MongoDb => {
            let url = cfg.mongodb_url();
            let store = with_retries(cfg.connect_attempts, || MongoStore::connect(&url, &cfg.name))
                .await?;
            store.ensure_indexes().await?;
            info!(database = %cfg.name, "mongodb store ready");
            Ok(Arc::new(store))
        }
        DatabaseKind::MariaDb => {
            let url = cfg.mariadb_url();
            let store = with_retries(cfg.connect_attempts, || MariaDbStore::connect(&url)).await?;
            store.migrate().await?;
            info!("mariadb store ready");
            Ok(Arc::new(store))
        }
        DatabaseKind::Redis => Err(StoreError::Unsupported(
            "redis cannot be the primary database".into(),
        )),
    }
}

async fn with_retries<T, F, Fut>(attempts: u32, mut connect: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(store) => return Ok(store),
            Err(e) if attempt < attempts => {
                warn!(error = %e, attempt, attempts, "database not reachable yet");
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_store_answers() {
        let calls = AtomicU32::new(0);
        let result = with_retries(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Backend("refused".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Backend("refused".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
