use std::time::Duration;

use async_trait::async_trait;
use redis::{
    ConnectionInfo, IntoConnectionInfo, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};

use super::{
    error::{LockError, LockResult},
    traits::{LeaseHandle, LeaseStore, new_lease_token},
};
use crate::config::RedisLockConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Macro to execute a Redis command on either connection type.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Macro to execute a Redis script on either connection type.
macro_rules! redis_script {
    ($conn:expr, $script:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $script.invoke_async(c).await,
            RedisConn::Cluster(ref mut c) => $script.invoke_async(c).await,
        }
    };
}

/// Extend the lease only while it still carries our token.
/// Returns 1 when extended, 0 when the lease belongs to someone else or is gone.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Delete the lease only while it still carries our token.
/// Returns 1 when deleted, 0 otherwise.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Internal enum to hold either a standalone or cluster Redis client.
enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// Lease store backed by Redis `SET NX PX`.
pub struct RedisLeaseStore {
    connection: RedisConnection,
    key_prefix: String,
}

impl RedisLeaseStore {
    pub async fn from_config(config: &RedisLockConfig) -> LockResult<Self> {
        let connection = if let Some(cluster_config) = &config.cluster {
            // Cluster mode: comma-separated node list
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{}", s)
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(LockError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            }

            let cluster_client = redis::cluster::ClusterClientBuilder::new(nodes)
                .retries(cluster_config.retries)
                .connection_timeout(Duration::from_secs(cluster_config.connection_timeout_secs))
                .response_timeout(Duration::from_secs(cluster_config.response_timeout_secs))
                .build()?;
            RedisConnection::Cluster(cluster_client)
        } else {
            let client = redis::Client::open(config.url.as_str())?;
            RedisConnection::Standalone(client)
        };

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn prefixed_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    async fn get_connection(&self) -> LockResult<RedisConn> {
        match &self.connection {
            RedisConnection::Standalone(client) => {
                let conn = client.get_multiplexed_async_connection().await?;
                Ok(RedisConn::Standalone(conn))
            }
            RedisConnection::Cluster(client) => {
                let conn = client.get_async_connection().await?;
                Ok(RedisConn::Cluster(conn))
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, name: &str, ttl: Duration) -> LockResult<Option<LeaseHandle>> {
        let mut conn = self.get_connection().await?;
        let key = self.prefixed_key(name);
        let token = new_lease_token();

        // SET ... NX returns "OK" if set, nil if key exists
        let result: Option<String> = redis_cmd!(
            conn,
            redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
        )?;

        Ok(result.map(|_| LeaseHandle::new(name, token)))
    }

    async fn renew(&self, lease: &LeaseHandle, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.get_connection().await?;
        let key = self.prefixed_key(lease.name());

        let renewed: i64 = redis_script!(
            conn,
            redis::Script::new(RENEW_SCRIPT)
                .key(&key)
                .arg(lease.token())
                .arg(ttl_millis(ttl))
        )?;

        Ok(renewed == 1)
    }

    async fn release(&self, lease: &LeaseHandle) -> LockResult<bool> {
        let mut conn = self.get_connection().await?;
        let key = self.prefixed_key(lease.name());

        let released: i64 = redis_script!(
            conn,
            redis::Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(lease.token())
        )?;

        Ok(released == 1)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
