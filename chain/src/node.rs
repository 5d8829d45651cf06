//! Container-backed nodes.
//!
//! A [Node] knows where its files live on the host, how its container is
//! named, and how to run short-lived jobs against its home directory. Names
//! and paths are stable before any container exists, so genesis assembly can
//! reference hostnames of nodes that have not been started yet.

use crate::{config::DockerImage, Error};
use ibctest_runtime::{
    condense_hostname, random_suffix, sanitize_container_name, ContainerSpec, Output, Runtime,
    CLEANUP_LABEL,
};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Grace period before a stopped container is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(30);

/// Containers run as root so they can write to bind-mounted directories.
const ROOT_USER: &str = "0:0";

/// Length of the random suffix appended to job container names.
const JOB_SUFFIX: usize = 3;

/// Where (and for which test) nodes are created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub test_name: String,
    pub home_root: PathBuf,
    pub network_id: String,
}

impl Scope {
    pub fn new(test_name: &str, home_root: &Path, network_id: &str) -> Arc<Self> {
        Arc::new(Self {
            test_name: test_name.to_string(),
            home_root: home_root.to_path_buf(),
            network_id: network_id.to_string(),
        })
    }
}

/// Properties shared by every node of one role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    /// Role prefix of the container name (for example `val` or `relaychain`).
    pub prefix: String,
    pub chain_id: String,
    /// Chain name, which decides the home directory inside the container.
    pub chain_name: String,
    pub image: DockerImage,
    /// Ports published on the host.
    pub ports: Vec<u16>,
}

/// Wrap a runtime error with the container and operation it came from.
pub fn runtime<'a>(
    container: &'a str,
    command: &'static str,
) -> impl FnOnce(ibctest_runtime::Error) -> Error + 'a {
    move |source| Error::Runtime {
        container: container.to_string(),
        command,
        source,
    }
}

/// Pull every image, logging (but otherwise ignoring) failures.
pub async fn pull_images<E: Runtime>(context: &E, images: &[DockerImage]) {
    for image in images {
        let reference = image.reference();
        if let Err(err) = context.pull(&reference).await {
            warn!(image = reference, ?err, "failed to pull image");
        }
    }
}

/// Write identical `contents` to `relative` in every node's home, logging a digest per node.
pub fn distribute<'a, E, I>(nodes: I, relative: &str, contents: &[u8]) -> Result<(), Error>
where
    E: Runtime + 'a,
    I: IntoIterator<Item = &'a Node<E>>,
{
    let digest = hex::encode(Sha256::digest(contents));
    for node in nodes {
        node.write_file(relative, contents)?;
        info!(node = node.name(), file = relative, sha256 = digest, "distributed file");
    }
    Ok(())
}

/// A process of a network, backed by a container.
pub struct Node<E: Runtime> {
    context: E,
    scope: Arc<Scope>,
    template: Template,
    index: usize,
    container: Option<String>,
    host_ports: BTreeMap<u16, String>,
}

impl<E: Runtime> Node<E> {
    pub fn new(context: E, scope: Arc<Scope>, template: Template, index: usize) -> Self {
        Self {
            context,
            scope,
            template,
            index,
            container: None,
            host_ports: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn context(&self) -> &E {
        &self.context
    }

    pub fn image(&self) -> &DockerImage {
        &self.template.image
    }

    /// Container name: `{prefix}-{index}-{chain id}-{test name}`.
    pub fn name(&self) -> String {
        sanitize_container_name(&format!(
            "{}-{}-{}-{}",
            self.template.prefix, self.index, self.template.chain_id, self.scope.test_name
        ))
    }

    pub fn hostname(&self) -> String {
        condense_hostname(&self.name())
    }

    /// Host directory holding this node's files.
    pub fn dir(&self) -> PathBuf {
        self.scope.home_root.join(self.name())
    }

    /// Home directory inside the container.
    pub fn home(&self) -> String {
        format!("/home/.{}", self.template.chain_name)
    }

    pub fn binds(&self) -> Vec<String> {
        vec![format!("{}:{}", self.dir().display(), self.home())]
    }

    /// Host path of `relative` (inside the node's home).
    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir().join(relative)
    }

    /// Container path of `relative` (inside the node's home).
    pub fn container_path(&self, relative: &str) -> String {
        format!("{}/{}", self.home(), relative)
    }

    pub fn read_file(&self, relative: &str) -> Result<Vec<u8>, Error> {
        Ok(std::fs::read(self.path(relative))?)
    }

    pub fn write_file(&self, relative: &str, contents: &[u8]) -> Result<(), Error> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn mkdir(&self) -> Result<(), Error> {
        std::fs::create_dir_all(self.dir())?;
        Ok(())
    }

    /// Id of the long-lived container, once created.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Host `ip:port` a container port is published on. Only available once started.
    pub fn host_address(&self, port: u16) -> Option<&str> {
        self.host_ports.get(&port).map(String::as_str)
    }

    fn spec(&self, name: &str, cmd: Vec<String>, ports: Vec<u16>) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            hostname: condense_hostname(name),
            image: self.template.image.reference(),
            cmd,
            env: Vec::new(),
            binds: self.binds(),
            user: ROOT_USER.to_string(),
            network: self.scope.network_id.clone(),
            labels: BTreeMap::from([(CLEANUP_LABEL.to_string(), self.scope.test_name.clone())]),
            exposed_ports: ports,
        }
    }

    /// Run `cmd` to completion in a short-lived container sharing this node's home.
    ///
    /// The container is removed whether or not the command succeeds. A
    /// non-zero exit code is returned as [Error::Job].
    pub async fn run_job(&self, label: &str, cmd: Vec<String>) -> Result<Output, Error> {
        let mut rng = self.context.clone();
        let name = sanitize_container_name(&format!(
            "{}-{}-{}",
            self.name(),
            label,
            random_suffix(&mut rng, JOB_SUFFIX)
        ));
        info!(container = name, cmd = cmd.join(" "), "running job");
        let spec = self.spec(&name, cmd, Vec::new());
        let id = self
            .context
            .create(&spec)
            .await
            .map_err(runtime(&name, "create"))?;
        let result = self.finish_job(&name, &id).await;
        if let Err(err) = self.context.remove(&id).await {
            if !err.is_not_found() {
                warn!(container = name, ?err, "failed to remove job container");
            }
        }
        let (exit_code, output) = result?;
        debug!(
            container = name,
            exit_code,
            stdout = output.stdout,
            stderr = output.stderr,
            "job finished"
        );
        if exit_code != 0 {
            return Err(Error::Job {
                container: name,
                exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn finish_job(&self, name: &str, id: &str) -> Result<(i64, Output), Error> {
        self.context
            .start(id)
            .await
            .map_err(runtime(name, "start"))?;
        let exit_code = self.context.wait(id).await.map_err(runtime(name, "wait"))?;
        let output = self.context.logs(id).await.map_err(runtime(name, "logs"))?;
        Ok((exit_code, output))
    }

    /// Create the long-lived container, replacing any stale container with the same name.
    ///
    /// `extra_binds` (`host:container`) are mounted next to the home directory.
    pub async fn create(&mut self, cmd: Vec<String>, extra_binds: &[String]) -> Result<(), Error> {
        let name = self.name();
        match self.context.remove(&name).await {
            Ok(()) => warn!(container = name, "removed stale container"),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(runtime(&name, "remove")(err)),
        }
        info!(container = name, cmd = cmd.join(" "), "creating container");
        let mut spec = self.spec(&name, cmd, self.template.ports.clone());
        spec.binds.extend_from_slice(extra_binds);
        let id = self
            .context
            .create(&spec)
            .await
            .map_err(runtime(&name, "create"))?;
        self.container = Some(id);
        Ok(())
    }

    /// Start the long-lived container and resolve its published ports.
    pub async fn start(&mut self) -> Result<(), Error> {
        let name = self.name();
        let Some(id) = self.container.clone() else {
            return Err(runtime(&name, "start")(ibctest_runtime::Error::NotFound(
                name.clone(),
            )));
        };
        self.context
            .start(&id)
            .await
            .map_err(runtime(&name, "start"))?;
        for port in self.template.ports.clone() {
            let address = self
                .context
                .port(&id, port)
                .await
                .map_err(runtime(&name, "port"))?;
            self.host_ports.insert(port, address);
        }
        info!(container = name, "started container");
        Ok(())
    }

    pub async fn create_and_start(
        &mut self,
        cmd: Vec<String>,
        extra_binds: &[String],
    ) -> Result<(), Error> {
        self.create(cmd, extra_binds).await?;
        self.start().await
    }

    /// Stop and remove the long-lived container. Missing containers are not an error.
    ///
    /// Without a recorded id the container is addressed by name, which catches
    /// a container whose `create` was abandoned after the engine accepted it.
    pub async fn stop(&mut self) -> Result<(), Error> {
        let name = self.name();
        let id = self.container.clone().unwrap_or_else(|| name.clone());
        match self.context.stop(&id, STOP_GRACE).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() || err.is_not_modified() => {}
            Err(err) => return Err(runtime(&name, "stop")(err)),
        }
        match self.context.remove(&id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(runtime(&name, "remove")(err)),
        }
        self.container = None;
        self.host_ports.clear();
        debug!(container = name, "stopped container");
        Ok(())
    }

    /// Run `cmd` inside the running container.
    pub async fn exec(&self, cmd: &[String], env: &[String]) -> Result<Output, Error> {
        let name = self.name();
        let Some(id) = self.container.as_deref() else {
            return Err(runtime(&name, "exec")(ibctest_runtime::Error::NotFound(
                name.clone(),
            )));
        };
        let (exit_code, output) = self
            .context
            .exec(id, cmd, env)
            .await
            .map_err(runtime(&name, "exec"))?;
        if exit_code != 0 {
            return Err(Error::Job {
                container: name,
                exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Delete everything in the home directory.
    ///
    /// Files written by containers are owned by root, so they are removed from
    /// inside a job container.
    pub async fn cleanup_home(&self) -> Result<(), Error> {
        if !self.dir().exists() {
            return Ok(());
        }
        let target = format!("{}/.", self.home());
        self.run_job(
            "cleanup",
            crate::command!["find", target, "-name", ".", "-o", "-prune", "-exec", "rm", "-rf", "--", "{}", "+"],
        )
        .await?;
        if let Err(err) = std::fs::remove_dir(self.dir()) {
            debug!(dir = %self.dir().display(), ?err, "failed to remove home directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;
    use ibctest_runtime::{
        deterministic::{self, Event, Process},
        Runner as _,
    };

    fn template() -> Template {
        Template {
            prefix: "val".to_string(),
            chain_id: "gaia-1".to_string(),
            chain_name: "gaia".to_string(),
            image: DockerImage {
                repository: "ghcr.io/strangelove-ventures/heighliner/gaia".to_string(),
                version: "v7.0.0".to_string(),
            },
            ports: vec![26656, 26657],
        }
    }

    #[test]
    fn test_naming() {
        deterministic::Runner::default().start(|context| async move {
            let scope = Scope::new("Test/Suite case", Path::new("/tmp/home"), "net");
            let node = Node::new(context, scope, template(), 2);
            assert_eq!(node.name(), "val-2-gaia-1-Test_Suite_case");
            assert_eq!(node.hostname(), node.name());
            assert_eq!(node.home(), "/home/.gaia");
            assert_eq!(
                node.binds(),
                vec!["/tmp/home/val-2-gaia-1-Test_Suite_case:/home/.gaia".to_string()]
            );
            assert_eq!(node.container_path("config/genesis.json"), "/home/.gaia/config/genesis.json");
        });
    }

    #[test]
    fn test_long_names_condense_hostname() {
        deterministic::Runner::default().start(|context| async move {
            let scope = Scope::new(&"x".repeat(80), Path::new("/tmp"), "net");
            let node = Node::new(context, scope, template(), 0);
            assert!(node.name().len() > 64);
            assert!(node.hostname().len() < 64);
            assert!(node.hostname().contains("_._"));
        });
    }

    #[test]
    fn test_run_job_removes_container() {
        let cfg = deterministic::Config::default().with_behavior(|_, cmd| {
            if cmd[0] == "fail" {
                Process::exited(2, "partial", "boom")
            } else {
                Process::exited(0, "done", "")
            }
        });
        deterministic::Runner::new(cfg).start(|context| async move {
            let home = tempfile::tempdir().unwrap();
            let scope = Scope::new("jobs", home.path(), "net");
            let node = Node::new(context.clone(), scope, template(), 0);

            let output = node.run_job("ok", crate::command!["echo"]).await.unwrap();
            assert_eq!(output.stdout, "done");

            match node.run_job("bad", crate::command!["fail"]).await {
                Err(Error::Job {
                    container,
                    exit_code,
                    stdout,
                    stderr,
                }) => {
                    assert!(container.starts_with("val-0-gaia-1-jobs-bad-"));
                    assert_eq!(container.len(), "val-0-gaia-1-jobs-bad-".len() + 3);
                    assert_eq!(exit_code, 2);
                    assert_eq!(stdout, "partial");
                    assert_eq!(stderr, "boom");
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert!(context.container_names().is_empty());
        });
    }

    #[test]
    fn test_lifecycle_and_stale_container() {
        deterministic::Runner::default().start(|context| async move {
            let home = tempfile::tempdir().unwrap();
            let scope = Scope::new("life", home.path(), "net");
            let mut node = Node::new(context.clone(), scope, template(), 0);

            // A container left behind by a crashed run
            let stale = ContainerSpec {
                name: node.name(),
                ..Default::default()
            };
            context.inject(stale, true);

            node.create_and_start(crate::command!["gaiad", "start"], &[])
                .await
                .unwrap();
            assert_eq!(context.running(), vec![node.name()]);
            assert!(node.host_address(26657).unwrap().starts_with("127.0.0.1:"));
            assert!(node.host_address(9090).is_none());

            node.stop().await.unwrap();
            node.stop().await.unwrap();
            assert!(context.container_names().is_empty());
            assert!(node.host_address(26657).is_none());
            assert!(context
                .auditor()
                .events()
                .contains(&Event::Removed { name: node.name() }));
        });
    }

    #[test]
    fn test_stop_without_recorded_id() {
        deterministic::Runner::default().start(|context| async move {
            let scope = Scope::new("orphan", Path::new("/tmp"), "net");
            let mut node = Node::new(context.clone(), scope, template(), 0);
            let orphan = ContainerSpec {
                name: node.name(),
                ..Default::default()
            };
            context.inject(orphan, true);

            node.stop().await.unwrap();
            assert!(context.container_names().is_empty());
            node.stop().await.unwrap();
        });
    }

    #[test]
    fn test_distribute() {
        deterministic::Runner::default().start(|context| async move {
            let home = tempfile::tempdir().unwrap();
            let scope = Scope::new("dist", home.path(), "net");
            let nodes: Vec<_> = (0..3)
                .map(|i| Node::new(context.clone(), scope.clone(), template(), i))
                .collect();
            distribute(&nodes, "config/genesis.json", b"{\"chain_id\":\"gaia-1\"}").unwrap();
            for node in &nodes {
                assert_eq!(
                    node.read_file("config/genesis.json").unwrap(),
                    b"{\"chain_id\":\"gaia-1\"}"
                );
            }
        });
    }

    #[test]
    fn test_exec_requires_container() {
        deterministic::Runner::default().start(|context| async move {
            let scope = Scope::new("exec", Path::new("/tmp"), "net");
            let node = Node::new(context, scope, template(), 0);
            assert!(matches!(
                node.exec(&crate::command!["ls"], &[]).await,
                Err(Error::Runtime {
                    command: "exec",
                    ..
                })
            ));
        });
    }

    #[test]
    fn test_cleanup_home() {
        deterministic::Runner::new(mocks::config()).start(|context| async move {
            let home = tempfile::tempdir().unwrap();
            let scope = Scope::new("clean", home.path(), "net");
            let node = Node::new(context, scope, template(), 0);
            node.mkdir().unwrap();
            node.write_file("config/genesis.json", b"{}").unwrap();
            node.cleanup_home().await.unwrap();
            assert!(!node.dir().exists());

            // Nothing left to clean
            node.cleanup_home().await.unwrap();
        });
    }
}
