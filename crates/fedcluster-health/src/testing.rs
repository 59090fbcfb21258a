//! In-memory [`ClusterClient`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::client::{BoxFuture, CallError, ClusterClient, NodeLabels, ProbeTarget};

/// Scripted answer to a discovery call.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Err(CallError),
    /// Never completes.
    Hang,
}

/// Answers calls per endpoint from a script. The last scripted reply
/// repeats once the script is exhausted.
#[derive(Default)]
pub struct ScriptedClient {
    discover: Mutex<HashMap<String, VecDeque<Reply>>>,
    nodes: Mutex<HashMap<String, Result<Vec<NodeLabels>, CallError>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, endpoint: &str, replies: impl IntoIterator<Item = Reply>) {
        self.discover
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), replies.into_iter().collect());
    }

    pub fn set_nodes(&self, endpoint: &str, nodes: Result<Vec<NodeLabels>, CallError>) {
        self.nodes.lock().unwrap().insert(endpoint.to_string(), nodes);
    }

    /// Number of discovery calls made against `endpoint`.
    pub fn discover_calls(&self, endpoint: &str) -> u32 {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    fn next_reply(&self, endpoint: &str) -> Reply {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default() += 1;
        let mut scripts = self.discover.lock().unwrap();
        match scripts.get_mut(endpoint) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Ok),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Ok),
            None => Reply::Err(CallError::Connect(format!("{endpoint}: no route"))),
        }
    }
}

/// Node labels with the given zone and region.
pub fn node(zone: &str, region: &str) -> NodeLabels {
    let mut labels = NodeLabels::new();
    labels.insert("topology.kubernetes.io/zone".to_string(), zone.to_string());
    labels.insert("topology.kubernetes.io/region".to_string(), region.to_string());
    labels
}

impl ClusterClient for ScriptedClient {
    fn discover<'a>(&'a self, target: &'a ProbeTarget) -> BoxFuture<'a, Result<(), CallError>> {
        let reply = self.next_reply(&target.endpoint);
        Box::pin(async move {
            match reply {
                Reply::Ok => Ok(()),
                Reply::Err(e) => Err(e),
                Reply::Hang => std::future::pending().await,
            }
        })
    }

    fn list_nodes<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> BoxFuture<'a, Result<Vec<NodeLabels>, CallError>> {
        let nodes = self
            .nodes
            .lock()
            .unwrap()
            .get(&target.endpoint)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        Box::pin(async move { nodes })
    }
}
