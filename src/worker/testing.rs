//! In-memory spawner for exercising scheduling without processes.

use super::event::{EventSender, PoolEvent};
use super::lifecycle::WorkerId;
use super::protocol::{ControlMessage, TaskParam, WorkerSignal};
use super::signals::TerminationReason;
use super::spawn::{SpawnRequest, Spawner, WorkerHandle};
use crate::error::{PoolError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// What a fake worker does with an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Finish,
    Fail,
    /// Never reports; only a deadline or shutdown ends it.
    Silent,
    /// Exits without reporting.
    Crash(TerminationReason),
}

type ReplyFn = Arc<dyn Fn(&TaskParam) -> Reply + Send + Sync>;

struct WorldState {
    next_id: u32,
    spawned: Vec<(WorkerId, TaskParam)>,
    dispatched: Vec<(WorkerId, TaskParam)>,
    sent: Vec<(WorkerId, ControlMessage)>,
    stopped: Vec<WorkerId>,
    killed: Vec<WorkerId>,
    broken: bool,
    failing_spawns: usize,
    events: HashMap<WorkerId, EventSender>,
    exits: HashMap<WorkerId, TerminationReason>,
    reply: ReplyFn,
}

/// Shared record of everything fake workers were asked to do.
#[derive(Clone)]
pub struct FakeWorld {
    state: Arc<Mutex<WorldState>>,
}

impl FakeWorld {
    /// A world whose workers finish every assignment.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WorldState {
                next_id: 100,
                spawned: Vec::new(),
                dispatched: Vec::new(),
                sent: Vec::new(),
                stopped: Vec::new(),
                killed: Vec::new(),
                broken: false,
                failing_spawns: 0,
                events: HashMap::new(),
                exits: HashMap::new(),
                reply: Arc::new(|_| Reply::Finish),
            })),
        }
    }

    /// Decide per parameter how workers respond.
    pub fn with_reply(self, reply: impl Fn(&TaskParam) -> Reply + Send + Sync + 'static) -> Self {
        self.lock().reply = Arc::new(reply);
        self
    }

    /// Make the next `count` spawns fail.
    pub fn fail_spawns(&self, count: usize) {
        self.lock().failing_spawns = count;
    }

    /// Make every later `send` fail.
    pub fn break_channels(&self) {
        self.lock().broken = true;
    }

    /// A spawner backed by this world.
    pub fn spawner(&self) -> FakeSpawner {
        FakeSpawner {
            world: self.clone(),
        }
    }

    /// A detached handle that never emits events.
    pub fn handle(&self, id: u32) -> Box<dyn WorkerHandle> {
        Box::new(FakeHandle {
            id: WorkerId::new(id),
            world: self.clone(),
        })
    }

    pub fn spawned(&self) -> Vec<(WorkerId, TaskParam)> {
        self.lock().spawned.clone()
    }

    /// Every parameter handed to any worker, in order.
    pub fn dispatched(&self) -> Vec<TaskParam> {
        self.lock()
            .dispatched
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(WorkerId, ControlMessage)> {
        self.lock().sent.clone()
    }

    pub fn stopped(&self) -> Vec<WorkerId> {
        self.lock().stopped.clone()
    }

    pub fn killed(&self) -> Vec<WorkerId> {
        self.lock().killed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap()
    }

    fn respond(&self, worker: WorkerId, params: &TaskParam) {
        let reply_fn = self.lock().reply.clone();
        let reply = reply_fn(params);
        let mut state = self.lock();
        state.dispatched.push((worker, params.clone()));
        let Some(events) = state.events.get(&worker).cloned() else {
            return;
        };
        match reply {
            Reply::Finish => {
                let _ = events.send(PoolEvent::Signal {
                    worker,
                    signal: WorkerSignal::Finish,
                });
            }
            Reply::Fail => {
                let _ = events.send(PoolEvent::Signal {
                    worker,
                    signal: WorkerSignal::Failed,
                });
            }
            Reply::Silent => {}
            Reply::Crash(reason) => {
                state.exits.insert(worker, reason);
                state.events.remove(&worker);
                let _ = events.send(PoolEvent::ChannelClosed { worker });
            }
        }
    }

    fn close_channel(&self, worker: WorkerId) {
        if let Some(events) = self.lock().events.remove(&worker) {
            let _ = events.send(PoolEvent::ChannelClosed { worker });
        }
    }
}

pub struct FakeSpawner {
    world: FakeWorld,
}

impl Spawner for FakeSpawner {
    fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Box<dyn WorkerHandle>> {
        let id = {
            let mut state = self.world.lock();
            if state.failing_spawns > 0 {
                state.failing_spawns -= 1;
                return Err(PoolError::Spawn("fake spawn failure".into()));
            }
            let id = WorkerId::new(state.next_id);
            state.next_id += 1;
            state.spawned.push((id, request.initial.clone()));
            state.events.insert(id, request.events.clone());
            id
        };
        self.world.respond(id, request.initial);
        Ok(Box::new(FakeHandle {
            id,
            world: self.world.clone(),
        }))
    }
}

struct FakeHandle {
    id: WorkerId,
    world: FakeWorld,
}

impl WorkerHandle for FakeHandle {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn send(&mut self, message: &ControlMessage) -> Result<()> {
        {
            let mut state = self.world.lock();
            if state.broken {
                return Err(PoolError::Ipc("fake channel closed".into()));
            }
            state.sent.push((self.id, message.clone()));
        }
        if let ControlMessage::Assign { params } = message {
            self.world.respond(self.id, params);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.world.lock().stopped.push(self.id);
        self.world.close_channel(self.id);
    }

    fn kill(&mut self) {
        self.world.lock().killed.push(self.id);
        self.world.close_channel(self.id);
    }

    fn reap(&mut self) -> TerminationReason {
        self.world
            .lock()
            .exits
            .get(&self.id)
            .cloned()
            .unwrap_or(TerminationReason::Exited(1))
    }
}
