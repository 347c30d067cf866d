//! Per-compilation context.
//!
//! Everything a phase may consult besides the graph itself travels in a
//! [`CompilationContext`]: configuration, metadata access, the compilation
//! alarm and the optional dump hook. Contexts are not shared between
//! compilations; only the `Arc<dyn MetaAccess>` is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::CompilerConfig;
use crate::dump::{DumpHook, DumpScope};
use crate::error::{CompileError, CompileResult};
use crate::ir::graph::Graph;
use crate::meta::{MetaAccess, MetaTable};

// =============================================================================
// Compilation Alarm
// =============================================================================

/// A wall-clock budget checked at phase boundaries and worklist polls.
#[derive(Debug, Clone, Copy)]
pub struct CompilationAlarm {
    started: Instant,
    budget: Option<Duration>,
}

impl CompilationAlarm {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// An alarm that never fires.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    #[inline]
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn has_expired(&self) -> bool {
        self.budget.is_some_and(|b| self.started.elapsed() >= b)
    }

    /// `Err(Timeout)` once the budget is used up.
    pub fn check(&self, phase: &'static str) -> CompileResult<()> {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => {
                warn!(phase, ?budget, "compilation alarm fired");
                Err(CompileError::Timeout { phase, budget })
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Compilation Context
// =============================================================================

pub struct CompilationContext {
    config: CompilerConfig,
    meta: Arc<dyn MetaAccess>,
    alarm: CompilationAlarm,
    dump: Option<Arc<dyn DumpHook>>,
}

impl CompilationContext {
    /// The alarm starts ticking now.
    pub fn new(config: CompilerConfig, meta: Arc<dyn MetaAccess>) -> Self {
        let alarm = CompilationAlarm::new(config.compilation_budget);
        Self {
            config,
            meta,
            alarm,
            dump: None,
        }
    }

    /// Testing configuration over an empty metadata table.
    pub fn for_testing() -> Self {
        Self::new(CompilerConfig::for_testing(), Arc::new(MetaTable::new()))
    }

    pub fn with_dump_hook(mut self, hook: Arc<dyn DumpHook>) -> Self {
        self.dump = Some(hook);
        self
    }

    #[inline]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    #[inline]
    pub fn meta(&self) -> &dyn MetaAccess {
        self.meta.as_ref()
    }

    pub fn meta_arc(&self) -> Arc<dyn MetaAccess> {
        Arc::clone(&self.meta)
    }

    #[inline]
    pub fn alarm(&self) -> &CompilationAlarm {
        &self.alarm
    }

    #[inline]
    pub fn check_alarm(&self, phase: &'static str) -> CompileResult<()> {
        self.alarm.check(phase)
    }

    /// Pass `graph` to the dump hook, if one is installed.
    pub fn dump(&self, graph: &Graph, scope: DumpScope<'_>) {
        if let Some(hook) = &self.dump {
            hook.dump(graph, scope);
        }
    }

    /// Dump after a phase when phase dumping is enabled.
    pub fn dump_phase(&self, graph: &Graph, phase: &'static str) {
        if self.config.dump_phases {
            self.dump(graph, DumpScope::AfterPhase(phase));
        }
    }
}

impl std::fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("config", &self.config)
            .field("alarm", &self.alarm)
            .field("dump", &self.dump.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_disabled() {
        let alarm = CompilationAlarm::disabled();
        assert!(!alarm.has_expired());
        assert!(alarm.check("test").is_ok());
    }

    #[test]
    fn test_alarm_zero_budget_fires() {
        let alarm = CompilationAlarm::new(Some(Duration::ZERO));
        assert!(alarm.has_expired());
        let err = alarm.check("canonicalizer").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, CompileError::Timeout { phase: "canonicalizer", .. }));
    }

    #[test]
    fn test_context_budget_from_config() {
        let config = CompilerConfig::for_testing().with_budget(Duration::from_secs(3600));
        let ctx = CompilationContext::new(config, Arc::new(MetaTable::new()));
        assert_eq!(ctx.alarm().budget(), Some(Duration::from_secs(3600)));
        assert!(ctx.check_alarm("cfg").is_ok());
    }
}
