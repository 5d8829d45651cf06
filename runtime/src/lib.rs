//! Drive containers, HTTP endpoints, and time behind swappable runtimes.
//!
//! This crate provides the capabilities a test network needs from its host:
//! a container engine ([Containers]), a JSON-over-HTTP client ([Http]), a
//! [Clock], and randomness. Two runtimes implement them. The `docker` module
//! drives a real Docker daemon through its command-line client and is meant
//! for end-to-end runs. The `deterministic` module keeps every container in
//! memory, runs user-scripted processes, and records an ordered log of
//! operations so that orchestration logic can be tested without a daemon.
//!
//! # Terminology
//!
//! Each runtime is composed of a `Runner` and a `Context`. The `Runner`
//! implements the [Runner] trait and drives execution of a root task. The
//! `Context` implements the capability traits and is cloned into every task
//! that needs them.

use rand::RngCore;
use std::{
    collections::BTreeMap,
    future::Future,
    io::Error as IoError,
    time::{Duration, SystemTime},
};
use thiserror::Error;

pub mod deterministic;
pub mod docker;
mod utils;
pub use utils::*;

/// Label attached to every container and network created by a test so that
/// stale resources can be found and removed later.
pub const CLEANUP_LABEL: &str = "ibctest";

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not modified: {0}")]
    NotModified(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("port not published: {0}")]
    PortNotPublished(String),
    #[error("http request failed: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

impl Error {
    /// Returns true if the target container or network does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the operation was a no-op (for example stopping a stopped container).
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Error::NotModified(_))
    }
}

/// Interface that any runtime must implement to start running a root task.
pub trait Runner {
    /// Context defines the environment available to tasks.
    type Context;

    /// Start running a root task and block until it completes.
    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future;
}

/// Everything needed to create a container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    /// Fully-qualified image reference (`repository:version`).
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// Bind mounts in `host:container` form.
    pub binds: Vec<String>,
    /// User in `uid:gid` form. Empty uses the image default.
    pub user: String,
    pub network: String,
    pub labels: BTreeMap<String, String>,
    /// Container ports to expose and publish on random host ports.
    pub exposed_ports: Vec<u16>,
}

/// Captured output of a process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Container listing entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub id: String,
    pub name: String,
    pub running: bool,
}

/// Interface that any runtime must implement to manage containers.
///
/// Methods that target a container accept either its id or its name.
pub trait Containers: Clone + Send + Sync + 'static {
    /// Make `image` available locally. Pulling an image that is already present is a no-op.
    fn pull(&self, image: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Create (but do not start) a container, returning its id.
    fn create(&self, spec: &ContainerSpec) -> impl Future<Output = Result<String, Error>> + Send;

    /// Start a created container.
    fn start(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Block until the container exits and return its exit code.
    fn wait(&self, id: &str) -> impl Future<Output = Result<i64, Error>> + Send;

    /// Return everything the container has written so far.
    fn logs(&self, id: &str) -> impl Future<Output = Result<Output, Error>> + Send;

    /// Stop a running container, killing it after `grace`.
    fn stop(&self, id: &str, grace: Duration) -> impl Future<Output = Result<(), Error>> + Send;

    /// Remove a container (forcefully, along with its anonymous volumes).
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// List all containers (running or not) carrying `label=value`.
    fn list(
        &self,
        label: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<Summary>, Error>> + Send;

    /// Host address (`ip:port`) a container port is published on.
    fn port(&self, id: &str, port: u16) -> impl Future<Output = Result<String, Error>> + Send;

    /// Run `cmd` inside a running container.
    fn exec(
        &self,
        id: &str,
        cmd: &[String],
        env: &[String],
    ) -> impl Future<Output = Result<(i64, Output), Error>> + Send;

    /// Create a bridge network, returning its id.
    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    /// List networks carrying `label=value`, returning their ids.
    fn list_networks(
        &self,
        label: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Remove a network.
    fn remove_network(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Interface that any runtime must implement to issue JSON requests.
pub trait Http: Clone + Send + Sync + 'static {
    /// GET `url` and decode the body as JSON.
    fn get(&self, url: &str) -> impl Future<Output = Result<serde_json::Value, Error>> + Send;

    /// POST `body` to `url` and decode the response as JSON.
    fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, Error>> + Send;
}

/// Interface that any runtime must implement to provide time-based operations.
///
/// It is necessary to mock time to provide deterministic execution
/// of polling loops.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> SystemTime;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static;
}

/// Every capability an orchestrator needs.
pub trait Runtime: Containers + Http + Clock + RngCore {}

impl<T> Runtime for T where T: Containers + Http + Clock + RngCore {}
