// Discovery — fetch node lists from seed relays over HTTP
//
// Each seed is asked in its own task. The caller waits at most `timeout`
// for all of them, but tasks are never cancelled: a list that arrives late
// is still handed to `on_list`.

use super::TransportError;
use crate::store::{NodeAddress, NodeSet};
use hyper::body::HttpBody as _;
use hyper::{Client, StatusCode, Uri};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for seeds before carrying on
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single fetch, so a silent seed does not pin a task forever
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest node list accepted from a seed
const MAX_LIST_BYTES: usize = 1024 * 1024;

/// Outcome of one bootstrap round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    /// Seeds asked
    pub seeds: usize,
    /// Seeds whose list arrived before the timeout
    pub responded: usize,
    /// The timeout fired before every seed answered
    pub timed_out: bool,
}

/// `GET http://<node>/discover` and decode the body as a node list
pub async fn fetch_node_list(node: &NodeAddress) -> Result<NodeSet, TransportError> {
    let uri: Uri = format!("http://{}/discover", node)
        .parse()
        .map_err(|e| TransportError::Http(format!("{}: {}", node, e)))?;

    let response = Client::new()
        .get(uri)
        .await
        .map_err(|e| TransportError::Http(format!("{}: {}", node, e)))?;

    if response.status() != StatusCode::OK {
        return Err(TransportError::Http(format!(
            "{} answered {}",
            node,
            response.status()
        )));
    }

    let mut body = response.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| TransportError::Http(format!("{}: {}", node, e)))?;
        if bytes.len() + chunk.len() > MAX_LIST_BYTES {
            return Err(TransportError::Http(format!("{} sent an oversized list", node)));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(NodeSet::decode(&String::from_utf8_lossy(&bytes)))
}

/// Ask every seed for its node list.
///
/// `on_list` runs once per seed that answers, as soon as it answers, and
/// may run after this function has returned.
pub async fn bootstrap<F>(seeds: &NodeSet, timeout: Duration, on_list: F) -> BootstrapReport
where
    F: Fn(&NodeAddress, NodeSet) + Send + Sync + 'static,
{
    let on_list = Arc::new(on_list);
    let responded = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = seeds
        .iter()
        .cloned()
        .map(|seed| {
            let on_list = on_list.clone();
            let responded = responded.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(FETCH_TIMEOUT, fetch_node_list(&seed)).await {
                    Ok(Ok(list)) => {
                        tracing::debug!("Seed {} listed {} nodes", seed, list.len());
                        responded.fetch_add(1, Ordering::SeqCst);
                        on_list(&seed, list);
                    }
                    Ok(Err(e)) => tracing::debug!("Discovery via {} failed: {}", seed, e),
                    Err(_) => tracing::debug!("Discovery via {} gave up", seed),
                }
            })
        })
        .collect();

    let timed_out = tokio::time::timeout(timeout, futures::future::join_all(tasks))
        .await
        .is_err();

    let report = BootstrapReport {
        seeds: seeds.len(),
        responded: responded.load(Ordering::SeqCst),
        timed_out,
    };

    if timed_out {
        tracing::info!(
            "Discovery timed out: {}/{} seeds answered",
            report.responded,
            report.seeds
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_bootstrap_with_no_seeds() {
        let report = bootstrap(&NodeSet::new(), Duration::from_millis(50), |_, _| {}).await;
        assert_eq!(report, BootstrapReport::default());
    }

    #[tokio::test]
    async fn test_unreachable_seed_is_swallowed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let lists = Arc::new(Mutex::new(Vec::new()));
        let sink = lists.clone();
        let seeds: NodeSet = [NodeAddress::from_parts("127.0.0.1", port).unwrap()]
            .into_iter()
            .collect();

        let report = bootstrap(&seeds, Duration::from_secs(5), move |_, list| {
            sink.lock().push(list);
        })
        .await;

        assert_eq!(report.seeds, 1);
        assert_eq!(report.responded, 0);
        assert!(!report.timed_out);
        assert!(lists.lock().is_empty());
    }
}
