//! Reconciliation primitives.
//!
//! This library holds the pure decision logic behind formation reconciliation:
//!
//! - **Scale planning**: compare a desired replica count with the number of
//!   live replicas and decide whether to start, stop, or hold.
//! - **Placement**: choose hosts for new jobs. Policies are pluggable; the
//!   controller picks one per operation from configuration.
//!
//! # Invariants
//!
//! - Planning is deterministic given the same inputs
//! - A plan either starts jobs or stops jobs, never both
//! - Holding (desired == current) produces no actions

use thiserror::Error;

/// Placement errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// Jobs were requested but no host is known.
    #[error("no hosts available to place {requested} job(s)")]
    NoHosts { requested: usize },

    /// The configured policy name is not recognised.
    #[error("unknown placement policy: {0}")]
    UnknownPolicy(String),
}

/// The corrective action for one formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Start this many new jobs.
    ScaleUp(usize),

    /// Stop this many of the current jobs.
    ScaleDown(usize),

    /// Current count already matches the desired count.
    Hold,
}

/// Clamp a requested quantity to a valid replica count.
///
/// Negative requests mean "none".
pub fn clamp_quantity(requested: i64) -> u32 {
    u32::try_from(requested.max(0)).unwrap_or(u32::MAX)
}

/// Decide how to move from `current` live jobs to `desired`.
pub fn plan_scale(desired: u32, current: usize) -> ScaleAction {
    let desired = desired as usize;
    match desired.cmp(&current) {
        std::cmp::Ordering::Greater => ScaleAction::ScaleUp(desired - current),
        std::cmp::Ordering::Less => ScaleAction::ScaleDown(current - desired),
        std::cmp::Ordering::Equal => ScaleAction::Hold,
    }
}

/// A host candidate and how many jobs it currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLoad {
    /// Number of jobs currently scheduled on the host.
    pub jobs: usize,
}

/// Chooses hosts for new jobs.
///
/// `place` returns exactly `count` indices into `hosts`. The same index may
/// appear more than once when there are fewer hosts than jobs.
pub trait PlacementPolicy: Send + Sync + std::fmt::Debug {
    /// Policy name, as used in configuration.
    fn name(&self) -> &'static str;

    /// Choose a host index for each of `count` new jobs.
    fn place(&self, hosts: &[HostLoad], count: usize) -> Result<Vec<usize>, PlacementError>;
}

fn require_hosts(hosts: &[HostLoad], count: usize) -> Result<(), PlacementError> {
    if hosts.is_empty() && count > 0 {
        return Err(PlacementError::NoHosts { requested: count });
    }
    Ok(())
}

/// Cycle through the hosts in order until every job has a host.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl PlacementPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn place(&self, hosts: &[HostLoad], count: usize) -> Result<Vec<usize>, PlacementError> {
        require_hosts(hosts, count)?;
        Ok((0..hosts.len()).cycle().take(count).collect())
    }
}

/// Put every job on the first host.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstHost;

impl PlacementPolicy for FirstHost {
    fn name(&self) -> &'static str {
        "first"
    }

    fn place(&self, hosts: &[HostLoad], count: usize) -> Result<Vec<usize>, PlacementError> {
        require_hosts(hosts, count)?;
        Ok(vec![0; count])
    }
}

/// Put each job on the host with the fewest jobs, counting jobs placed
/// earlier in the same call. Ties go to the earliest host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl PlacementPolicy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn place(&self, hosts: &[HostLoad], count: usize) -> Result<Vec<usize>, PlacementError> {
        require_hosts(hosts, count)?;
        let mut loads: Vec<usize> = hosts.iter().map(|h| h.jobs).collect();
        let mut placed = Vec::with_capacity(count);
        for _ in 0..count {
            let Some((idx, _)) = loads
                .iter()
                .enumerate()
                .min_by_key(|(idx, load)| (**load, *idx))
            else {
                break;
            };
            loads[idx] += 1;
            placed.push(idx);
        }
        Ok(placed)
    }
}

/// Look up a placement policy by its configuration name.
pub fn policy_from_name(name: &str) -> Result<Box<dyn PlacementPolicy>, PlacementError> {
    match name {
        "round_robin" => Ok(Box::new(RoundRobin)),
        "first" => Ok(Box::new(FirstHost)),
        "least_loaded" => Ok(Box::new(LeastLoaded)),
        other => Err(PlacementError::UnknownPolicy(other.to_string())),
    }
}
