//! A deterministic runtime that keeps every container in memory.
//!
//! Containers never execute. Instead, a user-provided [Behavior] decides what
//! each process (a container's entrypoint or an `exec`) does, and an [HttpBehavior]
//! answers HTTP requests. Behaviors may touch the host filesystem through the
//! container's bind mounts, just like a real process would.
//!
//! Time is virtual: [crate::Clock::sleep] advances the clock without waiting.
//! Randomness comes from a seeded generator. Every operation is appended to an
//! ordered event log and folded into an [Auditor] digest, so two runs of the
//! same orchestration with the same seed can be compared byte for byte.
//!
//! # Example
//!
//! ```rust
//! use ibctest_runtime::{deterministic::{Config, Process, Runner}, ContainerSpec, Containers, Runner as _};
//!
//! let cfg = Config::default().with_behavior(|_, cmd| Process::exited(0, &cmd.join(" "), ""));
//! let executor = Runner::new(cfg);
//! executor.start(|context| async move {
//!     let spec = ContainerSpec {
//!         name: "job".to_string(),
//!         image: "busybox:latest".to_string(),
//!         cmd: vec!["echo".to_string(), "hi".to_string()],
//!         ..Default::default()
//!     };
//!     let id = context.create(&spec).await.unwrap();
//!     context.start(&id).await.unwrap();
//!     assert_eq!(context.wait(&id).await.unwrap(), 0);
//!     assert_eq!(context.logs(&id).await.unwrap().stdout, "echo hi");
//! });
//! ```

use crate::{ContainerSpec, Error, Output, Summary};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// What a scripted process does when started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Process {
    /// The process ran to completion.
    Exited { code: i64, output: Output },
    /// The process keeps running until stopped.
    Running,
}

impl Process {
    pub fn exited(code: i64, stdout: &str, stderr: &str) -> Self {
        Process::Exited {
            code,
            output: Output {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        }
    }
}

/// Decides the outcome of a process given its container and command line.
pub type Behavior = Arc<dyn Fn(&ContainerSpec, &[String]) -> Process + Send + Sync>;

/// An HTTP request observed by the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Answers HTTP requests.
pub type HttpBehavior = Arc<dyn Fn(&Request) -> Result<serde_json::Value, Error> + Send + Sync>;

/// An operation performed against the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Pulled { image: String },
    Created { name: String },
    Started { name: String },
    Exited { name: String, code: i64 },
    Stopped { name: String },
    Removed { name: String },
    Exec { name: String, cmd: Vec<String> },
    NetworkCreated { name: String },
    NetworkRemoved { name: String },
    Http { url: String },
}

impl Event {
    fn digest(&self, hasher: &mut Sha256) {
        match self {
            Event::Pulled { image } => {
                hasher.update(b"pulled");
                hasher.update(image.as_bytes());
            }
            Event::Created { name } => {
                hasher.update(b"created");
                hasher.update(name.as_bytes());
            }
            Event::Started { name } => {
                hasher.update(b"started");
                hasher.update(name.as_bytes());
            }
            Event::Exited { name, code } => {
                hasher.update(b"exited");
                hasher.update(name.as_bytes());
                hasher.update(code.to_be_bytes());
            }
            Event::Stopped { name } => {
                hasher.update(b"stopped");
                hasher.update(name.as_bytes());
            }
            Event::Removed { name } => {
                hasher.update(b"removed");
                hasher.update(name.as_bytes());
            }
            Event::Exec { name, cmd } => {
                hasher.update(b"exec");
                hasher.update(name.as_bytes());
                for arg in cmd {
                    hasher.update(arg.as_bytes());
                }
            }
            Event::NetworkCreated { name } => {
                hasher.update(b"network_created");
                hasher.update(name.as_bytes());
            }
            Event::NetworkRemoved { name } => {
                hasher.update(b"network_removed");
                hasher.update(name.as_bytes());
            }
            Event::Http { url } => {
                hasher.update(b"http");
                hasher.update(url.as_bytes());
            }
        }
    }
}

/// Track the state of the runtime for determinism auditing.
pub struct Auditor {
    hash: Mutex<Vec<u8>>,
    events: Mutex<Vec<Event>>,
}

impl Default for Auditor {
    fn default() -> Self {
        Self {
            hash: Vec::new().into(),
            events: Vec::new().into(),
        }
    }
}

impl Auditor {
    fn record(&self, event: Event) {
        let mut hash = self.hash.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        event.digest(&mut hasher);
        *hash = hasher.finalize().to_vec();
        self.events.lock().unwrap().push(event);
    }

    /// Generate a representation of the current state of the runtime.
    ///
    /// This can be used to ensure that logic running on top
    /// of the runtime is interacting deterministically.
    pub fn state(&self) -> String {
        let hash = self.hash.lock().unwrap().clone();
        hex::encode(hash)
    }

    /// Every event recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

/// Configuration for the deterministic runtime.
#[derive(Clone)]
pub struct Config {
    /// Seed for the random number generator.
    pub seed: u64,

    /// Outcome of every process started or executed.
    pub behavior: Behavior,

    /// Responses to HTTP requests.
    pub http: HttpBehavior,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            behavior: Arc::new(|_, _| Process::Running),
            http: Arc::new(|request| Err(Error::Http(format!("no route: {}", request.url)))),
        }
    }
}

impl Config {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_behavior<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContainerSpec, &[String]) -> Process + Send + Sync + 'static,
    {
        self.behavior = Arc::new(f);
        self
    }

    pub fn with_http<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Result<serde_json::Value, Error> + Send + Sync + 'static,
    {
        self.http = Arc::new(f);
        self
    }
}

/// Implementation of [crate::Runner] for the deterministic runtime.
pub struct Runner {
    cfg: Config,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Runner {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }
}

impl From<Config> for Runner {
    fn from(cfg: Config) -> Self {
        Self::new(cfg)
    }
}

impl crate::Runner for Runner {
    type Context = Context;

    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future,
    {
        futures::executor::block_on(f(Context::new(self.cfg)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Created,
    Running,
    Exited(i64),
}

struct Container {
    id: String,
    spec: ContainerSpec,
    status: Status,
    output: Output,
    ports: BTreeMap<u16, u16>,
}

struct Network {
    name: String,
    labels: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    containers: Vec<Container>,
    networks: BTreeMap<String, Network>,
    next_id: u64,
    next_port: u16,
    elapsed: Duration,
}

impl State {
    fn position(&self, id: &str) -> Result<usize, Error> {
        self.containers
            .iter()
            .position(|c| c.id == id || c.spec.name == id)
            .ok_or_else(|| Error::NotFound(format!("No such container: {id}")))
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }
}

/// Implementation of the capability traits for the deterministic runtime.
#[derive(Clone)]
pub struct Context {
    behavior: Behavior,
    http: HttpBehavior,
    state: Arc<Mutex<State>>,
    rng: Arc<Mutex<StdRng>>,
    auditor: Arc<Auditor>,
}

impl Context {
    fn new(cfg: Config) -> Self {
        Self {
            behavior: cfg.behavior,
            http: cfg.http,
            state: Arc::new(Mutex::new(State {
                next_port: 40000,
                ..Default::default()
            })),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(cfg.seed))),
            auditor: Arc::new(Auditor::default()),
        }
    }

    /// Access the auditor of the runtime.
    pub fn auditor(&self) -> Arc<Auditor> {
        self.auditor.clone()
    }

    /// Names of all containers that currently exist.
    pub fn container_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.containers.iter().map(|c| c.spec.name.clone()).collect()
    }

    /// Names of all containers that are currently running.
    pub fn running(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .filter(|c| c.status == Status::Running)
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// Names of all networks that currently exist.
    pub fn network_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.networks.values().map(|n| n.name.clone()).collect()
    }

    /// Create a container that survived a previous run (as if left behind by a crash).
    pub fn inject(&self, spec: ContainerSpec, running: bool) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id("c");
        state.containers.push(Container {
            id: id.clone(),
            spec,
            status: if running {
                Status::Running
            } else {
                Status::Exited(0)
            },
            output: Output::default(),
            ports: BTreeMap::new(),
        });
        id
    }

    /// Create a network that survived a previous run.
    pub fn inject_network(&self, name: &str, labels: BTreeMap<String, String>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id("n");
        state.networks.insert(
            id.clone(),
            Network {
                name: name.to_string(),
                labels,
            },
        );
        id
    }

    fn request(&self, request: Request) -> Result<serde_json::Value, Error> {
        self.auditor.record(Event::Http {
            url: request.url.clone(),
        });
        (self.http)(&request)
    }
}

impl crate::Containers for Context {
    async fn pull(&self, image: &str) -> Result<(), Error> {
        self.auditor.record(Event::Pulled {
            image: image.to_string(),
        });
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, Error> {
        let id = {
            let mut state = self.state.lock().unwrap();
            if state.containers.iter().any(|c| c.spec.name == spec.name) {
                return Err(Error::Conflict(format!(
                    "The container name \"/{}\" is already in use",
                    spec.name
                )));
            }
            let id = state.allocate_id("c");
            let mut ports = BTreeMap::new();
            for port in &spec.exposed_ports {
                state.next_port += 1;
                ports.insert(*port, state.next_port);
            }
            state.containers.push(Container {
                id: id.clone(),
                spec: spec.clone(),
                status: Status::Created,
                output: Output::default(),
                ports,
            });
            id
        };
        self.auditor.record(Event::Created {
            name: spec.name.clone(),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        let spec = {
            let state = self.state.lock().unwrap();
            let container = &state.containers[state.position(id)?];
            if container.status == Status::Running {
                return Err(Error::NotModified(format!("{id} is already running")));
            }
            container.spec.clone()
        };
        self.auditor.record(Event::Started {
            name: spec.name.clone(),
        });

        // Run the behavior without holding the lock (it may touch the filesystem)
        let process = (self.behavior)(&spec, &spec.cmd);
        let mut state = self.state.lock().unwrap();
        let index = state.position(id)?;
        let container = &mut state.containers[index];
        match process {
            Process::Exited { code, output } => {
                container.status = Status::Exited(code);
                container.output = output;
                drop(state);
                self.auditor.record(Event::Exited {
                    name: spec.name,
                    code,
                });
            }
            Process::Running => container.status = Status::Running,
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, Error> {
        let state = self.state.lock().unwrap();
        let container = &state.containers[state.position(id)?];
        match container.status {
            Status::Exited(code) => Ok(code),
            Status::Created | Status::Running => Err(Error::CommandFailed {
                command: "wait".to_string(),
                stderr: format!("{} would block forever", container.spec.name),
            }),
        }
    }

    async fn logs(&self, id: &str) -> Result<Output, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.containers[state.position(id)?].output.clone())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<(), Error> {
        let name = {
            let mut state = self.state.lock().unwrap();
            let index = state.position(id)?;
            let container = &mut state.containers[index];
            if container.status != Status::Running {
                return Err(Error::NotModified(format!("{id} is not running")));
            }
            container.status = Status::Exited(137);
            container.spec.name.clone()
        };
        self.auditor.record(Event::Stopped { name });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        let name = {
            let mut state = self.state.lock().unwrap();
            let index = state.position(id)?;
            state.containers.remove(index).spec.name
        };
        self.auditor.record(Event::Removed { name });
        Ok(())
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<Summary>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.spec.labels.get(label).map(String::as_str) == Some(value))
            .map(|c| Summary {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                running: c.status == Status::Running,
            })
            .collect())
    }

    async fn port(&self, id: &str, port: u16) -> Result<String, Error> {
        let state = self.state.lock().unwrap();
        let container = &state.containers[state.position(id)?];
        container
            .ports
            .get(&port)
            .map(|host| format!("127.0.0.1:{host}"))
            .ok_or_else(|| Error::PortNotPublished(format!("{id}:{port}")))
    }

    async fn exec(&self, id: &str, cmd: &[String], _env: &[String]) -> Result<(i64, Output), Error> {
        let spec = {
            let state = self.state.lock().unwrap();
            let container = &state.containers[state.position(id)?];
            if container.status != Status::Running {
                return Err(Error::CommandFailed {
                    command: "exec".to_string(),
                    stderr: format!("container {id} is not running"),
                });
            }
            container.spec.clone()
        };
        self.auditor.record(Event::Exec {
            name: spec.name.clone(),
            cmd: cmd.to_vec(),
        });
        match (self.behavior)(&spec, cmd) {
            Process::Exited { code, output } => Ok((code, output)),
            Process::Running => Ok((0, Output::default())),
        }
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let id = {
            let mut state = self.state.lock().unwrap();
            if state.networks.values().any(|n| n.name == name) {
                return Err(Error::Conflict(format!("network with name {name} already exists")));
            }
            let id = state.allocate_id("n");
            state.networks.insert(
                id.clone(),
                Network {
                    name: name.to_string(),
                    labels: labels.clone(),
                },
            );
            id
        };
        self.auditor.record(Event::NetworkCreated {
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn list_networks(&self, label: &str, value: &str) -> Result<Vec<String>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|(_, n)| n.labels.get(label).map(String::as_str) == Some(value))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), Error> {
        let name = {
            let mut state = self.state.lock().unwrap();
            let key = state
                .networks
                .iter()
                .find(|(key, n)| key.as_str() == id || n.name == id)
                .map(|(key, _)| key.clone())
                .ok_or_else(|| Error::NotFound(format!("No such network: {id}")))?;
            state.networks.remove(&key).map(|n| n.name).unwrap_or_default()
        };
        self.auditor.record(Event::NetworkRemoved { name });
        Ok(())
    }
}

impl crate::Http for Context {
    async fn get(&self, url: &str) -> Result<serde_json::Value, Error> {
        self.request(Request {
            method: "GET",
            url: url.to_string(),
            body: None,
        })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, Error> {
        self.request(Request {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
        })
    }
}

impl crate::Clock for Context {
    fn current(&self) -> SystemTime {
        let elapsed = self.state.lock().unwrap().elapsed;
        UNIX_EPOCH + elapsed
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static {
        let state = self.state.clone();
        async move {
            state.lock().unwrap().elapsed += duration;
        }
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        self.rng.lock().unwrap().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.lock().unwrap().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.lock().unwrap().try_fill_bytes(dest)
    }
}
