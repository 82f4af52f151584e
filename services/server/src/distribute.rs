//! Configuration distribution with at-least-once semantics.

use rumqttc::{AsyncClient, QoS};
use sn_protocol::{topic, Configuration, Revision};
use sqlx::PgPool;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::repo::{self, RepoError};

/// Publishes configuration revisions to devices and records when they went
/// out. Cheap to clone; the HTTP layer holds one per process.
#[derive(Clone)]
pub struct ConfigDistributor {
    client: AsyncClient,
    pool: PgPool,
    tasks: TaskTracker,
}

impl ConfigDistributor {
    pub fn new(client: AsyncClient, pool: PgPool) -> Self {
        Self {
            client,
            pool,
            tasks: TaskTracker::new(),
        }
    }

    /// Publish a configuration to the specified sensor.
    ///
    /// Fire-and-forget: schedules an unbounded-retry task and returns
    /// immediately, so an HTTP handler never blocks on delivery. The task
    /// terminates only once both the retained publish and the
    /// publication-timestamp write succeed. A task for a superseded
    /// revision keeps retrying; duplicates are harmless because devices
    /// de-duplicate by revision number, and revisions only increase.
    pub fn distribute(&self, sensor_id: &str, revision: Revision, configuration: serde_json::Value) {
        let client = self.client.clone();
        let pool = self.pool.clone();
        let sensor_id = sensor_id.to_owned();
        let payload = Configuration {
            revision,
            configuration,
        }
        .encode();

        self.tasks.spawn(async move {
            let topic = topic::configurations(&sensor_id);
            let mut backoff = Backoff::new();
            loop {
                match attempt(&client, &pool, &topic, &sensor_id, revision, &payload).await {
                    Ok(()) => {
                        info!(sensor_id, revision, "published configuration");
                        break;
                    }
                    Err(e) => {
                        let delay = backoff.next().unwrap_or_default();
                        warn!(
                            sensor_id,
                            revision,
                            delay_secs = delay.as_secs_f64(),
                            error = %e,
                            "failed to publish configuration, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }

    /// Number of distribution tasks still retrying.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for in-flight distribution tasks to finish. Used on shutdown
    /// and by tests; `distribute` must not be called afterwards.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[derive(Debug, thiserror::Error)]
enum DistributeError {
    #[error("publish: {0}")]
    Publish(#[from] rumqttc::ClientError),
    #[error("database: {0}")]
    Repo(#[from] RepoError),
}

/// One delivery attempt: retained QoS 1 publish, then the durable
/// publication-timestamp write. Either failure triggers a full retry;
/// re-publishing an already-delivered revision is safe.
async fn attempt(
    client: &AsyncClient,
    pool: &PgPool,
    topic: &str,
    sensor_id: &str,
    revision: Revision,
    payload: &[u8],
) -> Result<(), DistributeError> {
    client
        .publish(topic, QoS::AtLeastOnce, true, payload.to_vec())
        .await?;
    repo::configurations::update_on_publication(pool, sensor_id, revision).await?;
    Ok(())
}
