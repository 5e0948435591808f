//! Simulation engine: event loop, task scheduler, application driver.
//!
//! Single-threaded cooperative dispatch. A task suspends only by enqueuing a
//! future event for itself or by handing control to the transport, which
//! later schedules the completion event; handlers run to completion.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::app::{AppId, Application};
use crate::collective::{Collective, CollectiveKind};
use crate::device::{DeviceKind, DeviceState};
use crate::events::{Event, EventList};
use crate::flow::FlowToken;
use crate::task::{TaskId, TaskKind, TaskState};
use crate::time::SimTime;
use crate::topology::Topology;
use crate::transport::Transport;

/// The simulation driver.
///
/// Owns the event list, the topology handle, the transport, every registered
/// application, and the seeded RNG used for path selection. Runs until all
/// applications have completed their first iteration.
pub struct Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    pub(crate) events: EventList,
    pub(crate) topology: T,
    pub(crate) transport: X,
    pub(crate) apps: Vec<Application>,
    pub(crate) finished_apps: usize,
    pub(crate) rng: StdRng,
    started: bool,
}

impl<T, X> Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    /// Build an engine. `seed` drives path selection; one seed makes runs
    /// reproducible.
    pub fn new(topology: T, transport: X, seed: u64) -> Self {
        Self {
            events: EventList::new(),
            topology,
            transport,
            apps: Vec::new(),
            finished_apps: 0,
            rng: StdRng::seed_from_u64(seed),
            started: false,
        }
    }

    /// Register an application; returns its id.
    pub fn register(&mut self, app: Application) -> AppId {
        let id = self.apps.len();
        info!(app = id, tasks = app.ntasks(), "registered application");
        self.apps.push(app);
        id
    }

    pub fn app(&self, id: AppId) -> &Application {
        &self.apps[id]
    }

    pub fn apps(&self) -> &[Application] {
        &self.apps
    }

    /// Applications that have completed their first iteration.
    pub fn finished_apps(&self) -> usize {
        self.finished_apps
    }

    pub fn now(&self) -> SimTime {
        self.events.now()
    }

    pub fn events(&self) -> &EventList {
        &self.events
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// Run to completion: start the initial tasks of every registered
    /// application and dispatch events until the list is exhausted or the
    /// end time passes. Returns the final sim-time.
    pub fn run(&mut self) -> SimTime {
        assert!(!self.started, "engine already ran");
        self.started = true;
        for app in 0..self.apps.len() {
            self.start_initial_tasks(app);
        }
        while let Some(event) = self.events.pop() {
            self.dispatch(event);
        }
        info!(now = %self.events.now(), "simulation complete");
        self.events.now()
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::TaskWake { app, task } => self.on_task_wake(app, task),
            Event::FlowComplete(token) => self.on_flow_complete(token),
            Event::Transport { flow } => self.transport.on_event(&mut self.events, flow),
        }
    }

    fn on_flow_complete(&mut self, token: FlowToken) {
        match token {
            FlowToken::Comm { app, task } => self.comm_flow_done(app, task),
            FlowToken::Ring { app, task, peer } => self.ring_flow_done(app, task, peer),
            FlowToken::MultiRing {
                app,
                task,
                ring,
                peer,
            } => self.multi_ring_flow_done(app, task, ring, peer),
            FlowToken::ParamServer {
                app,
                task,
                node_idx,
                ..
            } => self.ps_flow_done(app, task, node_idx),
            FlowToken::PairShuffle { app, task } => self.dps_flow_done(app, task),
        }
    }

    /// Mark every zero-predecessor task ready and schedule its start event,
    /// spread one sim-time unit apart in load order so initial tasks fire in
    /// a deterministic order.
    pub(crate) fn start_initial_tasks(&mut self, app: AppId) {
        let now = self.events.now();
        let order = self.apps[app].task_order.clone();
        let mut delta = 0u64;
        for id in order {
            let starts = {
                let task = self.apps[app].task_mut(id);
                if task.counter != 0 {
                    false
                } else {
                    task.state = TaskState::Ready;
                    // Anchors flow start times on restarted iterations.
                    task.ready_time = now + SimTime(delta);
                    if task.kind == TaskKind::Comm {
                        debug!(app, task = %id, "communication task at iteration head");
                    }
                    true
                }
            };
            if starts {
                self.events
                    .schedule(now + SimTime(delta), Event::TaskWake { app, task: id });
                delta += 1;
            }
        }
    }

    /// Zero the finished count, restore every task to its load-time state,
    /// and start the next iteration.
    pub(crate) fn reset_and_restart(&mut self, app: AppId) {
        debug!(app, "resetting application for its next iteration");
        self.apps[app].reset_tasks();
        self.start_initial_tasks(app);
    }

    fn on_task_wake(&mut self, app: AppId, task: TaskId) {
        let (kind, counter, comm_over_network) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let over_network = t.kind == TaskKind::Comm
                && t.device
                    .map(|dev| a.device(dev).kind == DeviceKind::NwComm)
                    .unwrap_or(false);
            (t.kind, t.counter, over_network)
        };
        assert_eq!(
            counter, 0,
            "task {task} woke with {counter} pending predecessors"
        );

        if kind == TaskKind::AllReduce {
            self.begin_collective(app, task);
        } else if comm_over_network {
            self.launch_comm_flow(app, task);
        } else {
            self.execute_compute(app, task);
        }
    }

    fn begin_collective(&mut self, app: AppId, task: TaskId) {
        let kind = {
            let t = self.apps[app].task(task);
            t.collective
                .as_ref()
                .map(Collective::kind)
                .unwrap_or_else(|| panic!("all-reduce task {task} has no collective state"))
        };
        match kind {
            CollectiveKind::Ring => self.begin_ring(app, task),
            CollectiveKind::MultiRing => self.begin_multi_ring(app, task),
            CollectiveKind::ParamServer => self.begin_param_server(app, task),
            CollectiveKind::PairShuffle => self.begin_pair_shuffle(app, task),
        }
    }

    /// Compute-class task lifecycle: run when the device is idle, defer to
    /// its `busy_up_to` otherwise, finish when the run-to-finish event fires.
    fn execute_compute(&mut self, app: AppId, task: TaskId) {
        enum Step {
            Wake(SimTime),
            Finished,
        }

        let now = self.events.now();
        let step = {
            let Application { tasks, devices, .. } = &mut self.apps[app];
            let t = tasks
                .get_mut(&task)
                .unwrap_or_else(|| panic!("unknown task {task}"));
            let device_id = t
                .device
                .unwrap_or_else(|| panic!("compute task {task} has no device"));
            let device = devices
                .get_mut(&device_id)
                .unwrap_or_else(|| panic!("task {task} is bound to unknown device {device_id}"));

            match t.state {
                TaskState::NotReady => panic!("executing task {task} that is not ready"),
                TaskState::Finished => panic!("executing task {task} that already finished"),
                TaskState::Ready => {
                    if device.state == DeviceState::Idle {
                        t.state = TaskState::Running;
                        device.state = DeviceState::Busy;
                        t.start_time = now;
                        t.finish_time = now + t.run_time;
                        device.busy_up_to = t.finish_time;
                        debug!(app, task = %task, start = %now, finish = %t.finish_time, "task running");
                        Step::Wake(t.finish_time)
                    } else {
                        // Device busy: retry when it frees up.
                        debug!(app, task = %task, until = %device.busy_up_to, "task deferred");
                        Step::Wake(device.busy_up_to)
                    }
                }
                TaskState::Running => {
                    assert_eq!(
                        device.state,
                        DeviceState::Busy,
                        "task {task} finished on an idle device"
                    );
                    t.state = TaskState::Finished;
                    device.state = DeviceState::Idle;
                    Step::Finished
                }
            }
        };

        match step {
            Step::Wake(at) => self.events.schedule(at, Event::TaskWake { app, task }),
            Step::Finished => self.complete_task(app, task),
        }
    }

    /// Completion handler for a task entering the finished state: account
    /// it, release its successors, and close out the iteration when it was
    /// the last task standing.
    pub(crate) fn complete_task(&mut self, app: AppId, task: TaskId) {
        let now = self.events.now();
        let (finish, successors) = {
            let a = &mut self.apps[app];
            let t = a.task_mut(task);
            t.state = TaskState::Finished;
            let finish = t.finish_time;
            let successors = t.next_tasks.clone();
            a.n_finished_tasks += 1;
            if a.final_finish_time < finish {
                a.final_finish_time = finish;
            }
            debug!(
                app,
                task = %task,
                finished = a.n_finished_tasks,
                total = a.ntasks(),
                now = %now,
                "task finished"
            );
            (finish, successors)
        };

        for next in successors {
            let becomes_ready = {
                let t = self.apps[app].task_mut(next);
                t.counter = t
                    .counter
                    .checked_sub(1)
                    .unwrap_or_else(|| panic!("successor {next} of task {task}: counter underflow"));
                if t.counter == 0 {
                    t.ready_time = finish;
                    t.state = TaskState::Ready;
                    true
                } else {
                    false
                }
            };
            if becomes_ready {
                self.events
                    .schedule(finish, Event::TaskWake { app, task: next });
            }
        }

        let iteration_done = {
            let a = &self.apps[app];
            a.n_finished_tasks == a.ntasks()
        };
        if iteration_done {
            let first = {
                let a = &mut self.apps[app];
                a.count_iteration();
                if !a.finished_once {
                    a.finished_once = true;
                    a.first_iter_time = a.final_finish_time;
                    true
                } else {
                    false
                }
            };
            if first {
                self.finished_apps += 1;
                info!(
                    app,
                    time = %self.apps[app].first_iter_time,
                    finished_apps = self.finished_apps,
                    total_apps = self.apps.len(),
                    "application finished its first iteration"
                );
            }
            if self.finished_apps == self.apps.len() {
                info!(now = %now, "all applications finished once; ending simulation");
                self.events.set_end_time(now);
            } else {
                self.reset_and_restart(app);
            }
        }
    }
}
