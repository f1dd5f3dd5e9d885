//! Single-owner policy store.
//!
//! A dedicated thread owns the policy layers and the merged snapshot. Callers
//! talk to it through a bounded command queue; every layer change recomputes
//! the merge before the setter returns. Readers get an immutable
//! `Arc<PolicySnapshot>` and never hold a lock while talking to the Hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{PolicyError, PolicyResult};
use crate::metadata::apply_resolved_type_refs;
use crate::policy::{merge_policies, MergeOrder, Policy, RuleIndex};
use crate::types::TypeRef;

/// Merged policy at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    /// Incremented on every layer change.
    pub generation: u64,
    /// Effective merged policy.
    pub policy: Policy,
    /// Rule-set index of `policy`.
    pub index: RuleIndex,
}

impl PolicySnapshot {
    /// Builds a snapshot and its index.
    #[must_use]
    pub fn new(generation: u64, policy: Policy) -> Self {
        let index = RuleIndex::from_policy(&policy);
        Self {
            generation,
            policy,
            index,
        }
    }

    /// Returns a copy with the given TypeInstance TypeRefs filled in.
    #[must_use]
    pub fn with_resolved_type_refs(&self, type_refs: &HashMap<String, TypeRef>) -> Self {
        let mut policy = self.policy.clone();
        apply_resolved_type_refs(&mut policy, type_refs);
        Self::new(self.generation, policy)
    }
}

enum Command {
    SetGlobal {
        policy: Policy,
        reply: Sender<u64>,
    },
    SetAction {
        policy: Policy,
        reply: Sender<u64>,
    },
    SetWorkflowSteps {
        policies: Vec<Policy>,
        reply: Sender<u64>,
    },
    PushWorkflowStep {
        policy: Policy,
        reply: Sender<u64>,
    },
    PopWorkflowStep {
        reply: Sender<Option<Policy>>,
    },
    SetOrder {
        order: MergeOrder,
        reply: Sender<u64>,
    },
    Snapshot {
        reply: Sender<Arc<PolicySnapshot>>,
    },
    StoreResolvedMetadata {
        generation: u64,
        type_refs: HashMap<String, TypeRef>,
        reply: Sender<Option<Arc<PolicySnapshot>>>,
    },
}

struct StoreState {
    global: Policy,
    action: Policy,
    workflow_steps: Vec<Policy>,
    order: MergeOrder,
    snapshot: Arc<PolicySnapshot>,
}

impl StoreState {
    fn new(order: MergeOrder) -> Self {
        let mut state = Self {
            global: Policy::default(),
            action: Policy::default(),
            workflow_steps: Vec::new(),
            order,
            snapshot: Arc::new(PolicySnapshot::new(0, Policy::default())),
        };
        state.remerge();
        state
    }

    fn remerge(&mut self) -> u64 {
        let generation = self.snapshot.generation + 1;
        let policy = merge_policies(&self.order, &self.global, &self.action, &self.workflow_steps);
        tracing::debug!(
            generation,
            rule_sets = policy.rules.len(),
            workflow_steps = self.workflow_steps.len(),
            "merged policy layers"
        );
        self.snapshot = Arc::new(PolicySnapshot::new(generation, policy));
        generation
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SetGlobal { policy, reply } => {
                self.global = policy;
                let _ = reply.send(self.remerge());
            }
            Command::SetAction { policy, reply } => {
                self.action = policy;
                let _ = reply.send(self.remerge());
            }
            Command::SetWorkflowSteps { policies, reply } => {
                self.workflow_steps = policies;
                let _ = reply.send(self.remerge());
            }
            Command::PushWorkflowStep { policy, reply } => {
                self.workflow_steps.push(policy);
                let _ = reply.send(self.remerge());
            }
            Command::PopWorkflowStep { reply } => {
                let popped = self.workflow_steps.pop();
                self.remerge();
                let _ = reply.send(popped);
            }
            Command::SetOrder { order, reply } => {
                self.order = order;
                let _ = reply.send(self.remerge());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Arc::clone(&self.snapshot));
            }
            Command::StoreResolvedMetadata {
                generation,
                type_refs,
                reply,
            } => {
                // Layers changed since the lookup started; the result is stale.
                if generation != self.snapshot.generation {
                    tracing::debug!(
                        generation,
                        current = self.snapshot.generation,
                        "discarding resolved TypeInstance metadata"
                    );
                    let _ = reply.send(None);
                    return;
                }
                self.snapshot = Arc::new(self.snapshot.with_resolved_type_refs(&type_refs));
                let _ = reply.send(Some(Arc::clone(&self.snapshot)));
            }
        }
    }
}

/// Handle to the policy store thread.
pub struct PolicyStore {
    tx: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl PolicyStore {
    /// Starts the store thread with empty layers.
    ///
    /// # Errors
    /// Returns `Internal` if the thread cannot be spawned.
    pub fn start(order: MergeOrder, queue_capacity: usize) -> PolicyResult<Self> {
        let (tx, rx) = bounded::<Command>(queue_capacity.max(1));

        let handle = thread::Builder::new()
            .name("capact-policy-store".to_string())
            .spawn(move || run(&rx, StoreState::new(order)))
            .map_err(|e| PolicyError::internal(format!("failed to spawn policy store: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> PolicyResult<T> {
        let stopped = || PolicyError::internal("policy store stopped");
        let tx = self.tx.as_ref().ok_or_else(stopped)?;

        let (reply_tx, reply_rx) = bounded::<T>(1);
        tx.send(build(reply_tx)).map_err(|_| stopped())?;
        reply_rx.recv().map_err(|_| stopped())
    }

    /// Replaces the global layer. Returns the new generation.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn set_global(&self, policy: Policy) -> PolicyResult<u64> {
        self.request(|reply| Command::SetGlobal { policy, reply })
    }

    /// Replaces the Action layer. Returns the new generation.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn set_action(&self, policy: Policy) -> PolicyResult<u64> {
        self.request(|reply| Command::SetAction { policy, reply })
    }

    /// Replaces the whole workflow step stack. Returns the new generation.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn set_workflow_steps(&self, policies: Vec<Policy>) -> PolicyResult<u64> {
        self.request(|reply| Command::SetWorkflowSteps { policies, reply })
    }

    /// Pushes a workflow step policy. Returns the new generation.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn push_workflow_step(&self, policy: Policy) -> PolicyResult<u64> {
        self.request(|reply| Command::PushWorkflowStep { policy, reply })
    }

    /// Pops the most recently pushed workflow step policy.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn pop_workflow_step(&self) -> PolicyResult<Option<Policy>> {
        self.request(|reply| Command::PopWorkflowStep { reply })
    }

    /// Replaces the merge order. Returns the new generation.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn set_order(&self, order: MergeOrder) -> PolicyResult<u64> {
        self.request(|reply| Command::SetOrder { order, reply })
    }

    /// Returns the current snapshot.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn snapshot(&self) -> PolicyResult<Arc<PolicySnapshot>> {
        self.request(|reply| Command::Snapshot { reply })
    }

    /// Writes resolved TypeRefs back into the cached merged policy.
    ///
    /// Returns `None` when the layers changed after `generation` was read.
    ///
    /// # Errors
    /// Returns `Internal` if the store thread has stopped.
    pub fn store_resolved_metadata(
        &self,
        generation: u64,
        type_refs: HashMap<String, TypeRef>,
    ) -> PolicyResult<Option<Arc<PolicySnapshot>>> {
        self.request(|reply| Command::StoreResolvedMetadata {
            generation,
            type_refs,
            reply,
        })
    }
}

fn run(rx: &Receiver<Command>, mut state: StoreState) {
    while let Ok(cmd) = rx.recv() {
        state.handle(cmd);
    }
}

impl Drop for PolicyStore {
    fn drop(&mut self) {
        // Closing the channel stops the loop after queued commands drain.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
