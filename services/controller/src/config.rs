use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use shoal_id::HostId;

use crate::attach::AttachConfig;
use crate::cluster::JobConfig;
use crate::scheduler::DEFAULT_MAX_QUANTITY;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Run against an in-memory cluster instead of a scheduler service.
    pub dev_mode: bool,
    pub dev_hosts: Vec<HostId>,
    pub scheduler_url: String,
    pub scheduler_timeout: Duration,
    pub attach: AttachConfig,
    /// Static attach agent table, `(host, addr)`.
    pub attach_addrs: Vec<(HostId, String)>,
    pub jobs: JobDefaults,
    pub formation_placement: String,
    pub run_placement: String,
    /// Largest formation quantity accepted by the API.
    pub max_formation_quantity: u32,
}

/// Runtime defaults for new jobs.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub formation_image: String,
    pub formation_cmd: Vec<String>,
    pub run_image: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            formation_image: "titanous/redis".to_string(),
            formation_cmd: vec!["/bin/cat".to_string()],
            run_image: "ubuntu".to_string(),
        }
    }
}

impl JobDefaults {
    /// Runtime configuration given to every formation replica.
    pub fn formation_template(&self) -> JobConfig {
        JobConfig {
            image: self.formation_image.clone(),
            cmd: self.formation_cmd.clone(),
            attach_stdout: true,
            attach_stderr: true,
            ..JobConfig::default()
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) => {
            let secs = v
                .parse::<u64>()
                .with_context(|| format!("{name} must be a number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or("SHOAL_LISTEN_ADDR", "127.0.0.1:1200")
            .parse()
            .context("SHOAL_LISTEN_ADDR must be a socket address")?;

        let log_level = env_or("SHOAL_LOG_LEVEL", "info");
        let dev_mode = env_flag("SHOAL_DEV");
        let dev_hosts = parse_hosts(&env_or("SHOAL_DEV_HOSTS", "dev-host-1"))?;

        let scheduler_url = env_or("SHOAL_SCHEDULER_URL", "http://127.0.0.1:1300");
        let scheduler_timeout = env_secs("SHOAL_SCHEDULER_TIMEOUT_SECS", 30)?;

        let attach = AttachConfig {
            service: env_or("SHOAL_ATTACH_SERVICE", "shoal-host-attach"),
            connect_timeout: env_secs("SHOAL_ATTACH_CONNECT_TIMEOUT_SECS", 10)?,
            handshake_timeout: env_secs("SHOAL_ATTACH_HANDSHAKE_TIMEOUT_SECS", 30)?,
            wait_timeout: env_secs("SHOAL_ATTACH_WAIT_TIMEOUT_SECS", 300)?,
            ..AttachConfig::default()
        };
        let attach_addrs = parse_attach_addrs(&env_or("SHOAL_ATTACH_ADDRS", ""))?;

        let defaults = JobDefaults::default();
        let jobs = JobDefaults {
            formation_image: env_or("SHOAL_FORMATION_IMAGE", &defaults.formation_image),
            formation_cmd: std::env::var("SHOAL_FORMATION_CMD")
                .map(|v| parse_command(&v))
                .unwrap_or(defaults.formation_cmd),
            run_image: env_or("SHOAL_RUN_IMAGE", &defaults.run_image),
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            dev_hosts,
            scheduler_url,
            scheduler_timeout,
            attach,
            attach_addrs,
            jobs,
            formation_placement: env_or("SHOAL_FORMATION_PLACEMENT", "round_robin"),
            run_placement: env_or("SHOAL_RUN_PLACEMENT", "first"),
            max_formation_quantity: match std::env::var("SHOAL_MAX_FORMATION_QUANTITY") {
                Ok(v) => parse_max_quantity(&v)?,
                Err(_) => DEFAULT_MAX_QUANTITY,
            },
        })
    }
}

/// Parse a formation quantity limit. Zero would reject every scale-up.
pub fn parse_max_quantity(value: &str) -> Result<u32> {
    let max = value
        .trim()
        .parse::<u32>()
        .with_context(|| format!("SHOAL_MAX_FORMATION_QUANTITY must be a positive integer, got {value:?}"))?;
    if max == 0 {
        bail!("SHOAL_MAX_FORMATION_QUANTITY must be at least 1");
    }
    Ok(max)
}

/// Parse a comma separated host list.
pub fn parse_hosts(value: &str) -> Result<Vec<HostId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| HostId::new(s).with_context(|| format!("invalid host ID {s:?}")))
        .collect()
}

/// Parse `host=addr,host=addr`.
pub fn parse_attach_addrs(value: &str) -> Result<Vec<(HostId, String)>> {
    let mut addrs = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((host, addr)) = entry.split_once('=') else {
            bail!("attach address {entry:?} must be host=addr");
        };
        let addr = addr.trim();
        if addr.is_empty() {
            bail!("attach address for {host:?} is empty");
        }
        let host = HostId::new(host.trim()).with_context(|| format!("invalid host ID {host:?}"))?;
        addrs.push((host, addr.to_string()));
    }
    Ok(addrs)
}

/// Split a command line on whitespace.
pub fn parse_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
