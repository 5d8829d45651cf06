//! A runtime backed by a Docker daemon.
//!
//! Containers are managed through the `docker` command-line client, HTTP
//! requests are issued with [reqwest], and time is provided by [tokio].
//!
//! # Example
//!
//! ```rust,no_run
//! use ibctest_runtime::{docker::Runner, Containers, Runner as _, CLEANUP_LABEL};
//!
//! Runner::default().start(|context| async move {
//!     let stale = context.list(CLEANUP_LABEL, "my-test").await.unwrap();
//!     println!("{} stale containers", stale.len());
//! });
//! ```

use crate::{ContainerSpec, Error, Output, Summary};
use rand::{rngs::OsRng, RngCore};
use std::{
    collections::BTreeMap,
    future::Future,
    time::{Duration, SystemTime},
};
use tokio::{process::Command, runtime::Builder};
use tracing::debug;

/// Configuration for the Docker runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path (or name) of the docker client binary.
    pub binary: String,

    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,

    /// Number of tokio worker threads.
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            http_timeout: Duration::from_secs(10),
            worker_threads: 4,
        }
    }
}

/// Implementation of [crate::Runner] for a Docker daemon.
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

impl crate::Runner for Runner {
    type Context = Context;

    fn start<F, Fut>(self, f: F) -> Fut::Output
    where
        F: FnOnce(Self::Context) -> Fut,
        Fut: Future,
    {
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.cfg.worker_threads)
            .enable_all()
            .build()
            .expect("failed to create Tokio runtime");
        let client = reqwest::Client::builder()
            .timeout(self.cfg.http_timeout)
            .build()
            .expect("failed to create HTTP client");
        let context = Context {
            binary: self.cfg.binary,
            client,
        };
        runtime.block_on(f(context))
    }
}

/// Implementation of the capability traits for a Docker daemon.
#[derive(Clone)]
pub struct Context {
    binary: String,
    client: reqwest::Client,
}

/// Map a failed docker invocation to an [Error].
fn classify(command: String, stderr: String) -> Error {
    if stderr.contains("No such container")
        || stderr.contains("No such network")
        || stderr.contains("No such object")
        || stderr.contains("not found")
    {
        Error::NotFound(stderr)
    } else if stderr.contains("is already in use") {
        Error::Conflict(stderr)
    } else if stderr.contains("is not running") {
        Error::NotModified(stderr)
    } else {
        Error::CommandFailed { command, stderr }
    }
}

/// Translate `docker port` output to a dialable host address.
fn parse_port(output: &str) -> Option<String> {
    let line = output.lines().find(|l| !l.trim().is_empty())?.trim();
    let (host, port) = line.rsplit_once(':')?;
    let host = match host {
        "0.0.0.0" | "[::]" | "::" | "" => "127.0.0.1",
        other => other,
    };
    Some(format!("{host}:{port}"))
}

impl Context {
    /// Run the docker client, returning stdout on success.
    async fn docker(&self, args: &[String]) -> Result<String, Error> {
        debug!(args = ?args, "docker");
        let output = Command::new(&self.binary).args(args).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let command = args.first().cloned().unwrap_or_default();
            return Err(classify(command, stderr));
        }
        Ok(stdout)
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl crate::Containers for Context {
    async fn pull(&self, image: &str) -> Result<(), Error> {
        if self
            .docker(&args(["image", "inspect", "--format", "{{.Id}}", image]))
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.docker(&args(["pull", image])).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, Error> {
        let mut cmd = args(["create", "--name", &spec.name]);
        if !spec.hostname.is_empty() {
            cmd.extend(args(["--hostname", &spec.hostname]));
        }
        if !spec.network.is_empty() {
            cmd.extend(args(["--network", &spec.network]));
        }
        if !spec.user.is_empty() {
            cmd.extend(args(["--user", &spec.user]));
        }
        for (key, value) in &spec.labels {
            cmd.extend(args(["--label", &format!("{key}={value}")]));
        }
        for bind in &spec.binds {
            cmd.extend(args(["-v", bind]));
        }
        for env in &spec.env {
            cmd.extend(args(["-e", env]));
        }
        for port in &spec.exposed_ports {
            cmd.extend(args(["--expose", &format!("{port}/tcp")]));
        }
        if !spec.exposed_ports.is_empty() {
            cmd.push("-P".to_string());
        }
        cmd.push(spec.image.clone());
        cmd.extend(spec.cmd.iter().cloned());
        Ok(self.docker(&cmd).await?.trim().to_string())
    }

    async fn start(&self, id: &str) -> Result<(), Error> {
        self.docker(&args(["start", id])).await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, Error> {
        let out = self.docker(&args(["wait", id])).await?;
        out.trim()
            .parse()
            .map_err(|_| Error::InvalidResponse(format!("unexpected exit code: {out}")))
    }

    async fn logs(&self, id: &str) -> Result<Output, Error> {
        let output = Command::new(&self.binary)
            .args(["logs", id])
            .output()
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(classify("logs".to_string(), stderr));
        }
        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), Error> {
        let seconds = grace.as_secs().to_string();
        self.docker(&args(["stop", "-t", &seconds, id])).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        self.docker(&args(["rm", "-f", "-v", id])).await?;
        Ok(())
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<Summary>, Error> {
        let filter = format!("label={label}={value}");
        let out = self
            .docker(&args([
                "ps",
                "-a",
                "--filter",
                &filter,
                "--format",
                "{{.ID}}\t{{.Names}}\t{{.State}}",
            ]))
            .await?;
        let mut summaries = Vec::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split('\t');
            let (Some(id), Some(name), Some(state)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(Error::InvalidResponse(line.to_string()));
            };
            summaries.push(Summary {
                id: id.to_string(),
                name: name.to_string(),
                running: state == "running",
            });
        }
        Ok(summaries)
    }

    async fn port(&self, id: &str, port: u16) -> Result<String, Error> {
        let out = self
            .docker(&args(["port", id, &format!("{port}/tcp")]))
            .await?;
        parse_port(&out).ok_or_else(|| Error::PortNotPublished(format!("{id}:{port}")))
    }

    async fn exec(&self, id: &str, cmd: &[String], env: &[String]) -> Result<(i64, Output), Error> {
        let mut full = vec!["exec".to_string()];
        for e in env {
            full.extend(args(["-e", e]));
        }
        full.push(id.to_string());
        full.extend(cmd.iter().cloned());
        debug!(args = ?full, "docker");
        let output = Command::new(&self.binary).args(&full).output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.contains("No such container") {
            return Err(Error::NotFound(stderr));
        }
        if stderr.contains("is not running") {
            return Err(Error::CommandFailed {
                command: "exec".to_string(),
                stderr,
            });
        }
        let code = output.status.code().map(i64::from).unwrap_or(-1);
        Ok((
            code,
            Output {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr,
            },
        ))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let mut cmd = args(["network", "create", "--driver", "bridge"]);
        for (key, value) in labels {
            cmd.extend(args(["--label", &format!("{key}={value}")]));
        }
        cmd.push(name.to_string());
        Ok(self.docker(&cmd).await?.trim().to_string())
    }

    async fn list_networks(&self, label: &str, value: &str) -> Result<Vec<String>, Error> {
        let filter = format!("label={label}={value}");
        let out = self
            .docker(&args(["network", "ls", "-q", "--filter", &filter]))
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), Error> {
        self.docker(&args(["network", "rm", id])).await?;
        Ok(())
    }
}

impl crate::Http for Context {
    async fn get(&self, url: &str) -> Result<serde_json::Value, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Http(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, Error> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Http(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

impl crate::Clock for Context {
    fn current(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static {
        tokio::time::sleep(duration)
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        OsRng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        OsRng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Containers, Runner as _, CLEANUP_LABEL};

    #[test]
    fn test_classify() {
        assert!(classify("rm".into(), "Error: No such container: abc".into()).is_not_found());
        assert!(matches!(
            classify(
                "create".into(),
                "Conflict. The container name \"/val-0\" is already in use".into()
            ),
            Error::Conflict(_)
        ));
        assert!(classify("stop".into(), "container abc is not running".into()).is_not_modified());
        assert!(matches!(
            classify("start".into(), "boom".into()),
            Error::CommandFailed { .. }
        ));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(
            parse_port("0.0.0.0:49153\n[::]:49153\n").unwrap(),
            "127.0.0.1:49153"
        );
        assert_eq!(parse_port("10.0.0.2:26657").unwrap(), "10.0.0.2:26657");
        assert!(parse_port("\n").is_none());
    }

    #[test]
    #[ignore]
    fn test_busybox_job() {
        Runner::default().start(|context| async move {
            let spec = ContainerSpec {
                name: "ibctest-runtime-busybox".to_string(),
                image: "busybox:latest".to_string(),
                cmd: vec!["echo".to_string(), "hello".to_string()],
                labels: [(CLEANUP_LABEL.to_string(), "runtime".to_string())].into(),
                ..Default::default()
            };
            context.pull(&spec.image).await.unwrap();
            let id = context.create(&spec).await.unwrap();
            context.start(&id).await.unwrap();
            assert_eq!(context.wait(&id).await.unwrap(), 0);
            assert_eq!(context.logs(&id).await.unwrap().stdout.trim(), "hello");
            context.remove(&id).await.unwrap();
        });
    }
}
