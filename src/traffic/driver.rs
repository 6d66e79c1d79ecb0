use crate::mem::types::RequesterId;
use crate::timeq::Cycle;
use crate::traffic::logging::{PatternCheckpoint, TrafficLogger};
use crate::traffic::patterns::{PatternEngine, ThreadOp};

#[derive(Debug, Clone, Default)]
struct ThreadProgram {
    ops: Vec<ThreadOp>,
    pc: usize,
    awaiting_load: bool,
    last_load: Option<u64>,
}

impl ThreadProgram {
    fn current(&self) -> Option<&ThreadOp> {
        self.ops.get(self.pc)
    }

    fn retired(&self) -> bool {
        self.pc >= self.ops.len()
    }
}

/// Runs the thread programs of one core. Threads are spread over the core's LSU
/// lanes (`thread % lanes`), and each lane carries one thread's request at a time,
/// so the lane index doubles as the requester id seen by the bank arbiter.
#[derive(Debug, Default)]
pub struct CoreTrafficDriver {
    core_id: usize,
    lanes: usize,
    threads: Vec<ThreadProgram>,
    /// Next unretired thread per lane.
    lane_cursor: Vec<usize>,
    /// Threads still owing an op of each pattern.
    pattern_remaining: Vec<usize>,
    pattern_names: Vec<String>,
    checkpoints: Vec<PatternCheckpoint>,
    print_lines: bool,
}

impl CoreTrafficDriver {
    pub fn new(engine: &PatternEngine, core_id: usize, lanes: usize, print_lines: bool) -> Self {
        let lanes = lanes.max(1);
        let threads: Vec<ThreadProgram> = (0..engine.threads_per_core())
            .map(|t| ThreadProgram {
                ops: engine.program(core_id, t),
                ..ThreadProgram::default()
            })
            .collect();
        let pattern_remaining = remaining_per_pattern(&threads, engine.len());
        let pattern_names = (0..engine.len())
            .map(|idx| engine.pattern_name(idx).unwrap_or_default().to_string())
            .collect();
        let mut me = Self {
            core_id,
            lanes,
            threads,
            lane_cursor: (0..lanes).collect(),
            pattern_remaining,
            pattern_names,
            checkpoints: Vec::new(),
            print_lines,
        };
        for lane in 0..lanes {
            me.skip_retired(lane);
        }
        me
    }

    /// Rewind every thread to its first op. Programs are kept.
    pub fn reset(&mut self) {
        for thread in &mut self.threads {
            thread.pc = 0;
            thread.awaiting_load = false;
            thread.last_load = None;
        }
        self.lane_cursor = (0..self.lanes).collect();
        self.pattern_remaining = remaining_per_pattern(&self.threads, self.pattern_names.len());
        self.checkpoints.clear();
        for lane in 0..self.lanes {
            self.skip_retired(lane);
        }
    }

    /// Requests each free lane wants to issue this cycle, as `(lane, op)`.
    pub fn pending(&self) -> Vec<(RequesterId, ThreadOp)> {
        (0..self.lanes)
            .filter_map(|lane| {
                let thread = self.threads.get(self.lane_cursor[lane])?;
                if thread.awaiting_load {
                    return None;
                }
                thread.current().map(|op| (lane, *op))
            })
            .collect()
    }

    /// A granted load left the lane waiting for its response.
    pub fn mark_awaiting(&mut self, lane: RequesterId) {
        if let Some(thread) = self.threads.get_mut(self.lane_cursor[lane]) {
            thread.awaiting_load = true;
        }
    }

    /// The lane's current op finished; `value` carries the loaded word for reads.
    pub fn complete(&mut self, lane: RequesterId, value: Option<u64>, now: Cycle) {
        let cursor = self.lane_cursor[lane];
        let Some(thread) = self.threads.get_mut(cursor) else {
            return;
        };
        let Some(op) = thread.current().copied() else {
            return;
        };
        thread.awaiting_load = false;
        if value.is_some() {
            thread.last_load = value;
        }
        thread.pc += 1;

        self.pattern_remaining[op.pattern] -= 1;
        if self.pattern_remaining[op.pattern] == 0 {
            let checkpoint = PatternCheckpoint {
                core_id: self.core_id,
                pattern_name: self.pattern_names[op.pattern].clone(),
                finished_cycle: now,
            };
            if self.print_lines {
                TrafficLogger::log_pattern_checkpoint(&checkpoint);
            }
            self.checkpoints.push(checkpoint);
        }

        self.skip_retired(lane);
        if self.print_lines && self.is_done() {
            TrafficLogger::log_core_done(self.core_id, now);
        }
    }

    pub fn is_done(&self) -> bool {
        self.threads.iter().all(ThreadProgram::retired)
    }

    pub fn last_load(&self, thread: usize) -> Option<u64> {
        self.threads.get(thread).and_then(|t| t.last_load)
    }

    pub fn checkpoints(&self) -> &[PatternCheckpoint] {
        &self.checkpoints
    }

    fn skip_retired(&mut self, lane: RequesterId) {
        while self
            .threads
            .get(self.lane_cursor[lane])
            .is_some_and(ThreadProgram::retired)
        {
            self.lane_cursor[lane] += self.lanes;
        }
    }
}

fn remaining_per_pattern(threads: &[ThreadProgram], num_patterns: usize) -> Vec<usize> {
    let mut remaining = vec![0; num_patterns];
    for op in threads.iter().flat_map(|t| &t.ops) {
        remaining[op.pattern] += 1;
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::config::{TrafficConfig, TrafficLoggingConfig, TrafficPatternSpec};

    fn engine(threads_per_core: usize) -> PatternEngine {
        let cfg = TrafficConfig {
            threads_per_core,
            logging: TrafficLoggingConfig::default(),
            patterns: vec![
                TrafficPatternSpec {
                    kind: "global_id".to_string(),
                    op: "write".to_string(),
                    ..TrafficPatternSpec::default()
                },
                TrafficPatternSpec {
                    kind: "global_id".to_string(),
                    op: "read".to_string(),
                    ..TrafficPatternSpec::default()
                },
            ],
        };
        PatternEngine::new(&cfg, 1).unwrap()
    }

    #[test]
    fn lanes_walk_their_threads_in_order() {
        let mut driver = CoreTrafficDriver::new(&engine(4), 0, 2, false);
        let pending = driver.pending();
        assert_eq!(vec![0, 1], pending.iter().map(|(lane, _)| *lane).collect::<Vec<_>>());
        assert_eq!(0, pending[0].1.address);
        assert_eq!(1, pending[1].1.address);

        // lane 0: thread 0 stores, then loads
        driver.complete(0, None, 1);
        driver.mark_awaiting(0);
        assert_eq!(1, driver.pending().len());
        driver.complete(0, Some(0), 2);
        assert_eq!(Some(0), driver.last_load(0));
        // thread 2 is next on lane 0
        let next = driver.pending();
        assert_eq!((0, 2), (next[0].0, next[0].1.address));
    }

    #[test]
    fn checkpoints_fire_once_per_pattern() {
        let mut driver = CoreTrafficDriver::new(&engine(2), 0, 2, false);
        for lane in 0..2 {
            driver.complete(lane, None, 3);
        }
        assert_eq!(1, driver.checkpoints().len());
        for lane in 0..2 {
            driver.complete(lane, Some(lane as u64), 5);
        }
        assert!(driver.is_done());
        assert_eq!(2, driver.checkpoints().len());
        assert_eq!(5, driver.checkpoints()[1].finished_cycle);
        assert!(driver.pending().is_empty());
    }

    #[test]
    fn reset_replays_programs_from_the_start() {
        let mut driver = CoreTrafficDriver::new(&engine(2), 0, 2, false);
        for lane in 0..2 {
            driver.complete(lane, None, 1);
        }
        driver.mark_awaiting(0);
        driver.reset();

        assert!(driver.checkpoints().is_empty());
        assert_eq!(None, driver.last_load(0));
        let pending = driver.pending();
        assert_eq!(2, pending.len());
        assert!(pending.iter().all(|(_, op)| op.op.is_store()));
        for lane in 0..2 {
            driver.complete(lane, None, 2);
        }
        assert_eq!(1, driver.checkpoints().len());
    }
}
