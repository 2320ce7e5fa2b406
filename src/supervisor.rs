//! Starts the dashboard and worker executables as independent child
//! processes, watches them, and stops them on operator interrupt.
//!
//! There is no restart policy: a service that exits while monitored is
//! logged and left down.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use log::{error, info, warn};
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::error::SupervisorError;

pub const MANIFEST_FILE: &str = "supervisor.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Executable, relative to `cwd` unless absolute.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory relative to the supervisor root.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl ServiceSpec {
    pub fn working_dir(&self, root: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) => root.join(cwd),
            None => root.to_path_buf(),
        }
    }

    pub fn executable(&self, root: &Path) -> PathBuf {
        self.working_dir(root).join(&self.program)
    }
}

fn exe(name: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
}

pub fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: "WebApp (Dashboard)".into(),
            program: exe("webapp"),
            args: Vec::new(),
            cwd: None,
            port: Some(8000),
        },
        ServiceSpec {
            name: "Kilimall Worker".into(),
            program: exe("kilimall_worker"),
            args: Vec::new(),
            cwd: Some(PathBuf::from("workers/kilimall")),
            port: Some(5001),
        },
        ServiceSpec {
            name: "Jumia Worker".into(),
            program: exe("jumia_worker"),
            args: Vec::new(),
            cwd: Some(PathBuf::from("workers/jumia")),
            port: Some(5000),
        },
    ]
}

/// Services from `supervisor.json` under `root`, or the built-in table.
pub fn load_services(root: &Path) -> Result<Vec<ServiceSpec>, SupervisorError> {
    let manifest = root.join(MANIFEST_FILE);
    if !manifest.exists() {
        return Ok(default_services());
    }
    info!("Loading services from {}", manifest.display());
    let raw = fs::read_to_string(&manifest)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Fails with every missing executable listed, before anything starts.
pub fn check_required_files(root: &Path, services: &[ServiceSpec]) -> Result<(), SupervisorError> {
    let missing: Vec<PathBuf> = services
        .iter()
        .map(|s| s.executable(root))
        .filter(|p| !p.exists())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SupervisorError::MissingFiles(missing))
    }
}

pub fn banner_lines(services: &[ServiceSpec]) -> Vec<String> {
    let rule = "=".repeat(60);
    let mut lines = vec![rule.clone(), "[START] KILIMALL SCRAPER SUPERVISOR".to_string(), rule.clone()];
    for spec in services {
        match spec.port {
            Some(port) => lines.push(format!("{}: http://127.0.0.1:{}", spec.name, port)),
            None => lines.push(spec.name.clone()),
        }
    }
    lines.push(rule);
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Exited,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Stopped,
    ForceKilled,
    AlreadyExited,
}

pub trait ProcessHandle: Send {
    /// Non-blocking exit check.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Ask the process to stop (SIGTERM where available).
    fn terminate(&mut self) -> io::Result<()>;

    fn kill(&mut self) -> io::Result<()>;
}

pub trait Launcher {
    type Handle: ProcessHandle;

    fn launch(&mut self, spec: &ServiceSpec) -> io::Result<Self::Handle>;
}

/// Spawns real OS processes. Output streams are inherited, never piped, so
/// a chatty child cannot block on a full pipe buffer.
pub struct OsLauncher {
    root: PathBuf,
}

impl OsLauncher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Launcher for OsLauncher {
    type Handle = OsProcess;

    fn launch(&mut self, spec: &ServiceSpec) -> io::Result<OsProcess> {
        let child = Command::new(spec.executable(&self.root))
            .args(&spec.args)
            .current_dir(spec.working_dir(&self.root))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(OsProcess(child))
    }
}

pub struct OsProcess(Child);

impl ProcessHandle for OsProcess {
    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.0.try_wait()?.is_some())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = i32::try_from(self.0.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.0.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.0.kill()?;
        self.0.wait().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub startup_grace: Duration,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

struct Tracked<H> {
    name: String,
    port: Option<u16>,
    state: ServiceState,
    handle: H,
}

pub struct Supervisor<L: Launcher> {
    launcher: L,
    timings: Timings,
    services: Vec<Tracked<L::Handle>>,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, timings: Timings) -> Self {
        Self {
            launcher,
            timings,
            services: Vec::new(),
        }
    }

    pub fn states(&self) -> Vec<(String, ServiceState)> {
        self.services
            .iter()
            .map(|s| (s.name.clone(), s.state))
            .collect()
    }

    /// Start services one at a time. Each gets `startup_grace` to prove it
    /// did not exit immediately; on the first failure every service already
    /// started is stopped and the remaining ones are never launched.
    pub async fn start_all(&mut self, specs: &[ServiceSpec]) -> Result<(), SupervisorError> {
        for spec in specs {
            info!("[START] Starting {}...", spec.name);

            let handle = match self.launcher.launch(spec) {
                Ok(handle) => handle,
                Err(source) => {
                    error!("[ERROR] Error starting {}: {}", spec.name, source);
                    self.rollback().await;
                    return Err(SupervisorError::Launch {
                        name: spec.name.clone(),
                        source,
                    });
                }
            };
            self.services.push(Tracked {
                name: spec.name.clone(),
                port: spec.port,
                state: ServiceState::Starting,
                handle,
            });

            sleep(self.timings.startup_grace).await;

            let Some(tracked) = self.services.last_mut() else {
                continue;
            };
            let exited = tracked.handle.has_exited().unwrap_or_else(|e| {
                warn!("Could not poll {}: {}", tracked.name, e);
                true
            });
            if exited {
                tracked.state = ServiceState::Exited;
                error!("[ERROR] {} failed to start (exited immediately)", tracked.name);
                self.rollback().await;
                return Err(SupervisorError::ExitedImmediately(spec.name.clone()));
            }

            tracked.state = ServiceState::Running;
            match tracked.port {
                Some(port) => info!("[SUCCESS] {} started successfully on port {}", tracked.name, port),
                None => info!("[SUCCESS] {} started successfully", tracked.name),
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) {
        for (name, outcome) in self.shutdown_all().await {
            info!("Rolled back {}: {:?}", name, outcome);
        }
    }

    /// One liveness pass. Returns the services found to have exited since
    /// the previous pass.
    pub fn poll(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        for svc in self.services.iter_mut() {
            if svc.state != ServiceState::Running {
                continue;
            }
            match svc.handle.has_exited() {
                Ok(true) => {
                    warn!("[WARNING] {} has stopped unexpectedly", svc.name);
                    svc.state = ServiceState::Exited;
                    exited.push(svc.name.clone());
                }
                Ok(false) => {}
                Err(e) => warn!("Could not poll {}: {}", svc.name, e),
            }
        }
        exited
    }

    /// Poll every `poll_interval` until `shutdown` resolves, then stop
    /// everything still running.
    pub async fn monitor<S>(&mut self, shutdown: S) -> Vec<(String, ShutdownOutcome)>
    where
        S: Future<Output = ()>,
    {
        info!("[MONITOR] Monitoring services... (Press Ctrl+C to stop all)");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.timings.poll_interval) => {
                    self.poll();
                }
            }
        }

        info!("[STOP] Stopping all services...");
        self.shutdown_all().await
    }

    /// Terminate, wait up to `shutdown_timeout`, then kill whatever is left.
    pub async fn shutdown_all(&mut self) -> Vec<(String, ShutdownOutcome)> {
        let timeout = self.timings.shutdown_timeout;
        let mut outcomes = Vec::with_capacity(self.services.len());

        for svc in self.services.iter_mut() {
            let running = svc.state == ServiceState::Running
                || svc.state == ServiceState::Starting;
            if !running || svc.handle.has_exited().unwrap_or(false) {
                if running {
                    svc.state = ServiceState::Exited;
                }
                outcomes.push((svc.name.clone(), ShutdownOutcome::AlreadyExited));
                continue;
            }

            info!("[STOP] Stopping {}...", svc.name);
            if let Err(e) = svc.handle.terminate() {
                warn!("Failed to signal {}: {}", svc.name, e);
            }

            let outcome = if wait_for_exit(&mut svc.handle, timeout).await {
                info!("[SUCCESS] {} stopped successfully", svc.name);
                ShutdownOutcome::Stopped
            } else {
                warn!("[WARNING] Force killing {}...", svc.name);
                if let Err(e) = svc.handle.kill() {
                    error!("Failed to kill {}: {}", svc.name, e);
                }
                ShutdownOutcome::ForceKilled
            };
            svc.state = ServiceState::Terminated;
            outcomes.push((svc.name.clone(), outcome));
        }
        outcomes
    }
}

async fn wait_for_exit<H: ProcessHandle>(handle: &mut H, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if handle.has_exited().unwrap_or(false) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(50)).await;
    }
}
