use std::{
    fmt,
    time::{Duration, Instant},
};

pub use NO_LIMIT_TRACKER as NoLimitTracker;

/// Error returned when a resource limit is exceeded during execution.
///
/// Resource errors are uncatchable by script code: they unwind through every
/// try state and surface to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of heap allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum instruction operations exceeded.
    Operation { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum call depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Operation { limit, count } => {
                write!(f, "operation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum call depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Trait for tracking resource usage and scheduling garbage collection.
///
/// The heap and the interpreter are generic over a `ResourceTracker`, so a
/// tracker without limits compiles down to no-ops while sandboxed embedders
/// can enforce strict allocation, time, and memory budgets.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when memory is freed (during sweep).
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called at opcode boundaries to check time and operation limits.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new execution context to check call depth.
    ///
    /// `current_depth` is the context-stack depth before the push.
    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Returns the number of allocations since the last garbage collection
    /// at which a collection should be scheduled.
    fn gc_interval(&self) -> u32 {
        DEFAULT_GC_INTERVAL
    }

    /// Returns the total number of allocations tracked, if recorded.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Allocation high-water mark between collections when no limit is configured.
pub const DEFAULT_GC_INTERVAL: u32 = 4096;

/// Default maximum execution-context depth.
///
/// Deep enough for ordinary recursive scripts while keeping the interpreter's
/// own recursion well inside the host thread's stack (calls recurse through
/// the dispatch loop, so context depth multiplies native stack usage).
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// A resource tracker that enforces only the default call-depth limit.
///
/// All other checks compile away. This is the tracker embedders get unless
/// they opt into [`LimitedTracker`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct UnlimitedTracker;

/// Shared value form of [`UnlimitedTracker`] for expression contexts.
pub const NO_LIMIT_TRACKER: UnlimitedTracker = UnlimitedTracker;

impl ResourceTracker for UnlimitedTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_CALL_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_CALL_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Configuration for resource limits.
///
/// All limits are optional; `None` disables the corresponding check.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of interpreter operations per run.
    pub max_operations: Option<usize>,
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum execution time.
    pub max_duration: Option<Duration>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Run garbage collection every N allocations.
    pub gc_interval: Option<u32>,
    /// Maximum execution-context depth.
    pub max_call_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates limits with everything disabled except the default call depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_call_depth: Some(DEFAULT_MAX_CALL_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum number of interpreter operations per run.
    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    /// Sets the maximum execution duration.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the garbage collection interval (collect every N allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: u32) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Sets the maximum execution-context depth.
    #[must_use]
    pub fn max_call_depth(mut self, limit: Option<usize>) -> Self {
        self.max_call_depth = limit;
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// Tracks allocation count, memory usage, and execution time, returning
/// errors when limits are exceeded.
///
/// When serialized/deserialized, the `start_time` is reset to `Instant::now()`,
/// so time limits restart from zero after a snapshot restore.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// When execution started (for time limit checking).
    #[serde(skip, default = "Instant::now")]
    start_time: Instant,
    /// Total number of allocations made.
    allocation_count: usize,
    /// Number of interpreter operations executed.
    operation_count: usize,
    /// Current approximate memory usage in bytes.
    current_memory: usize,
}

impl LimitedTracker {
    /// Creates a new tracker with the given limits.
    ///
    /// The start time is recorded at creation, so create the tracker
    /// immediately before starting execution.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            operation_count: 0,
            current_memory: 0,
        }
    }

    /// Returns the elapsed time since tracker creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation {
                    limit: max,
                    count: self.operation_count,
                });
            }
        }

        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let max = self.limits.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH);
        if current_depth >= max {
            Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    fn gc_interval(&self) -> u32 {
        self.limits.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL)
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
