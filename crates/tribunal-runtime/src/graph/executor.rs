use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error};
use tribunal_core::SharedState;

use super::builder::TaskGraph;
use super::GraphError;

impl TaskGraph {
    /// Run every node to completion and return the merged state.
    ///
    /// On the first error every in-flight node is aborted and the error is
    /// returned; no partial state escapes.
    pub async fn execute(&self, initial: SharedState) -> Result<SharedState, GraphError> {
        let mut state = initial;
        let mut pending: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = self.order.iter().copied().filter(|&i| pending[i] == 0).collect();
        let mut join_set = JoinSet::new();
        let mut completed = 0usize;

        loop {
            if !ready.is_empty() {
                // Every node spawned in this batch sees the same merged state
                let snapshot = Arc::new(state.clone());
                while let Some(idx) = ready.pop_front() {
                    let node = Arc::clone(&self.nodes[idx]);
                    let snapshot = Arc::clone(&snapshot);
                    debug!(node = %node.name(), "Spawning node");
                    join_set.spawn(async move { (idx, node.run(snapshot).await) });
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            let (idx, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    join_set.abort_all();
                    error!(error = %e, "Node task failed to join");
                    return Err(GraphError::Join(e.to_string()));
                }
            };

            match result {
                Ok(update) => {
                    state.apply(update);
                    completed += 1;
                    for &succ in &self.successors[idx] {
                        pending[succ] -= 1;
                        if pending[succ] == 0 {
                            ready.push_back(succ);
                        }
                    }
                }
                Err(e) => {
                    join_set.abort_all();
                    return Err(e);
                }
            }
        }

        if completed != self.nodes.len() {
            return Err(GraphError::Join(format!(
                "{} of {} nodes never became ready",
                self.nodes.len() - completed,
                self.nodes.len()
            )));
        }
        Ok(state)
    }
}
