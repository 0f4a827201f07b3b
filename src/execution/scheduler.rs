//! Job scheduler - decides how many jobs run at once

use std::collections::VecDeque;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One job at a time, in job id order
    #[default]
    Sequential,

    /// Every job at once
    Parallel,

    /// At most N jobs at once
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    fn capacity(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Queue of jobs waiting to start
pub struct JobScheduler {
    strategy: SchedulingStrategy,
    queue: VecDeque<String>,
}

impl JobScheduler {
    pub fn new(strategy: SchedulingStrategy, job_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            strategy,
            queue: job_ids.into_iter().collect(),
        }
    }

    /// Jobs to start now, given how many are already running
    pub fn next_batch(&mut self, running: usize) -> Vec<String> {
        let free = self.strategy.capacity().saturating_sub(running);
        let count = free.min(self.queue.len());
        self.queue.drain(..count).collect()
    }

    /// Remove every job that has not started yet
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn has_more(&self) -> bool {
        !self.queue.is_empty()
    }
}
