use log::info;

#[derive(Debug, Default, Clone)]
pub struct PatternCheckpoint {
    pub core_id: usize,
    pub pattern_name: String,
    pub finished_cycle: u64,
}

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_pattern_checkpoint(checkpoint: &PatternCheckpoint) {
        info!(
            "[TRAFFIC] core {} {} finished at time {:>10}",
            checkpoint.core_id, checkpoint.pattern_name, checkpoint.finished_cycle
        );
    }

    pub fn log_core_done(core_id: usize, cycle: u64) {
        info!("[TRAFFIC] core {} all done at time {:>10}", core_id, cycle);
    }
}
