pub mod node;
pub mod msg;
pub mod rpc;
pub mod cluster;
pub mod verify;
pub mod config;

#[cfg(test)]
pub(crate) mod testutil;

pub use cluster::{Cluster, ProcessCluster, Readiness, StaticCluster};
pub use config::Config;
pub use node::NodeEndpoint;
pub use verify::{Outcome, Verifier};

use log::error;

/// Builds the collaborator a validated config asks for.
pub fn cluster_from(config: &Config) -> Result<Box<dyn Cluster>, rpc::Error> {
    let readiness = Readiness {
        client: rpc::Client::new(config.rpc_path.clone(), config.request_timeout())?,
        timeout: config.startup_timeout(),
        interval: config.poll_interval(),
    };
    Ok(match &config.launch {
        Some(launch) => Box::new(ProcessCluster::new(launch.clone(), readiness)),
        None => Box::new(StaticCluster::new(config.nodes.clone(), readiness)),
    })
}

/// One full run for a validated config. Failing to build the HTTP client is
/// an infrastructure fault and reported as a startup failure.
pub async fn verify(config: &Config) -> Outcome {
    let built = cluster_from(config).and_then(|cluster| {
        let client = rpc::Client::new(config.rpc_path.clone(), config.request_timeout())?;
        Ok((cluster, client))
    });
    let (mut cluster, client) = match built {
        Ok(built) => built,
        Err(err) => return startup_failed(&err),
    };
    Verifier::new(client, config.settings()).run(cluster.as_mut()).await
}

fn startup_failed(err: &rpc::Error) -> Outcome {
    error!("{err}");
    Outcome::StartupFailed { cause: err.to_string() }
}
