use std::str::FromStr;

use collective::COORDINATOR_RANK;

use crate::{data::ShardSpec, error::ConfigErr};

/// Where this process sits within the run.
///
/// Built once at startup and passed by reference, it only decides who is the
/// coordinator, the device slot, the global batch size and file names. It never
/// takes part in cadence arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    rank: usize,
    world_size: usize,
    local_rank: usize,
    local_world_size: usize,
}

impl RunContext {
    /// The context of a run without distributed processes.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: 0,
            local_world_size: 1,
        }
    }

    /// Creates a new `RunContext`.
    ///
    /// # Errors
    /// If a rank is out of range, or the processes can't be spread evenly over the nodes.
    pub fn new(
        rank: usize,
        world_size: usize,
        local_rank: usize,
        local_world_size: usize,
    ) -> Result<Self, ConfigErr> {
        let invalid = |var, reason: String| Err(ConfigErr::Environment { var, reason });

        if world_size == 0 || rank >= world_size {
            return invalid("RANK", format!("{rank} is out of range for WORLD_SIZE={world_size}"));
        }

        if local_world_size == 0 || local_rank >= local_world_size {
            return invalid(
                "LOCAL_RANK",
                format!("{local_rank} is out of range for LOCAL_WORLD_SIZE={local_world_size}"),
            );
        }

        if world_size % local_world_size != 0 {
            return invalid(
                "LOCAL_WORLD_SIZE",
                format!("{local_world_size} doesn't divide WORLD_SIZE={world_size}"),
            );
        }

        Ok(Self {
            rank,
            world_size,
            local_rank,
            local_world_size,
        })
    }

    /// Reads the context from the process environment.
    ///
    /// With none of the variables set the run is single process.
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads the context through `var`, a lookup of environment variables.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        const VARS: [&str; 4] = ["RANK", "WORLD_SIZE", "LOCAL_RANK", "LOCAL_WORLD_SIZE"];

        let values: Vec<Option<String>> = VARS.iter().map(|&name| var(name)).collect();

        if values.iter().all(Option::is_none) {
            return Ok(Self::single());
        }

        let mut parsed = [0usize; 4];
        for ((&name, value), slot) in VARS.iter().zip(values).zip(parsed.iter_mut()) {
            *slot = parse_var(name, value)?;
        }

        let [rank, world_size, local_rank, local_world_size] = parsed;
        Self::new(rank, world_size, local_rank, local_world_size)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn local_world_size(&self) -> usize {
        self.local_world_size
    }

    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == COORDINATOR_RANK
    }

    /// The accelerator slot of this process within its node.
    pub fn device_slot(&self) -> usize {
        self.local_rank
    }

    pub fn num_nodes(&self) -> usize {
        self.world_size / self.local_world_size
    }

    /// The amount of samples consumed by every process together per iteration.
    pub fn global_batch_size(&self, local_batch_size: usize) -> usize {
        local_batch_size * self.world_size
    }

    /// The name of this process in per-process log files.
    pub fn process_name(&self) -> String {
        format!("rank{}", self.rank)
    }

    pub fn shard(&self) -> ShardSpec {
        ShardSpec::new(self.rank, self.world_size)
    }
}

fn parse_var(name: &'static str, value: Option<String>) -> Result<usize, ConfigErr> {
    let Some(value) = value else {
        return Err(ConfigErr::Environment {
            var: name,
            reason: "is required in a distributed run".to_string(),
        });
    };

    usize::from_str(value.trim()).map_err(|e| ConfigErr::Environment {
        var: name,
        reason: format!("{value:?} is not a valid count: {e}"),
    })
}
