/// Engine-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum VM instructions per script phase. `None` disables the hook.
    pub instruction_limit: Option<u64>,
    /// Record per-node timings during `update()`.
    pub collect_update_report: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruction_limit(mut self, limit: u64) -> Self {
        self.instruction_limit = Some(limit);
        self
    }

    pub fn with_update_report(mut self, enabled: bool) -> Self {
        self.collect_update_report = enabled;
        self
    }
}
