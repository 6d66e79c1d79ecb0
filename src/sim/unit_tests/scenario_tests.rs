use crate::base::mem::HasMemory;
use crate::mem::tile::{TileCommand, TileState};
use crate::mem::types::GridCoord;
use crate::sim::config::RunConfig;
use crate::sim::top::GridTop;
use crate::sim::trace::TraceSink;
use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

fn quiet(mut config: RunConfig) -> RunConfig {
    config.traffic.logging.print_traffic_lines = false;
    config
}

fn pattern(kind: &str, op: &str, base: u64, stride: u64) -> TrafficPatternSpec {
    TrafficPatternSpec {
        kind: kind.to_string(),
        op: op.to_string(),
        base,
        stride,
        ..TrafficPatternSpec::default()
    }
}

fn with_patterns(patterns: Vec<TrafficPatternSpec>) -> RunConfig {
    quiet(RunConfig {
        traffic: TrafficConfig {
            patterns,
            ..TrafficConfig::default()
        },
        ..RunConfig::default()
    })
}

fn step_until(top: &mut GridTop, limit: usize, mut done: impl FnMut(&GridTop) -> bool) {
    for _ in 0..limit {
        if done(top) {
            return;
        }
        top.step().unwrap();
    }
    panic!("condition not reached within {limit} cycles");
}

#[test]
fn thousand_threads_store_their_global_id() {
    let mut top = GridTop::new(&quiet(RunConfig::default())).unwrap();
    let summary = top.run().unwrap();
    assert_eq!(1024, summary.total_threads);
    assert_eq!(3 * 1024, summary.total.retired_ops);

    let reachable = [0, 1, 4];
    let slice0 = top.fabric.slice(GridCoord::new(0, 0));
    for g in 0..1024usize {
        let core = g / 64;
        let expected = if reachable.contains(&core) { (g & 0xFF) as u64 } else { 0 };
        assert_eq!(expected, slice0.load(g).unwrap(), "thread {g} of core {core}");
    }
    // no other slice was touched
    for id in 1..16 {
        let slice = top.fabric.slice(GridCoord::from_linear(id, 4));
        assert!(slice.as_slice().iter().all(|&w| w == 0), "slice {id}");
    }
    assert_eq!(64, summary.mesh.local);
    assert_eq!(128, summary.mesh.neighbor);
    assert_eq!(13 * 64, summary.mesh.denied);
}

#[test]
fn private_and_global_stores_land_everywhere() {
    let mut top = GridTop::new(&quiet(RunConfig::default())).unwrap();
    top.run().unwrap();
    for g in 0..1024usize {
        let core = &top.cores[g / 64];
        assert_eq!((g & 0xFF) as u64, core.arbiter.store().load(g).unwrap());
        assert_eq!((g & 0xFF) as u64, top.global.load(0xC000 + g).unwrap());
    }
    // other cores' private words at the same address are untouched
    assert_eq!(0, top.cores[1].arbiter.store().load(0).unwrap());
}

#[test]
fn denied_loads_see_reset_value() {
    let mut top = GridTop::new(&with_patterns(vec![
        pattern("global_id", "write", 0x8000, 1),
        pattern("global_id", "read", 0x8000, 1),
    ]))
    .unwrap();
    top.run().unwrap();
    for (core, expect_data) in [(0, true), (1, true), (4, true), (5, false), (15, false)] {
        for t in 0..64 {
            let g = core * 64 + t;
            let expected = if expect_data { (g & 0xFF) as u64 } else { 0 };
            assert_eq!(Some(expected), top.cores[core].driver.last_load(t));
        }
    }
}

#[test]
fn bank_conflicts_resolve_and_every_thread_retires() {
    // every lane of a core hits bank 0
    let mut top = GridTop::new(&with_patterns(vec![
        pattern("strided", "write", 0, 8),
        pattern("strided", "read", 0, 8),
    ]))
    .unwrap();
    let summary = top.run().unwrap();
    assert!(summary.total.conflicts > 0);
    assert!(summary.total.warp_stall_cycles > 0);
    assert_eq!(2 * 1024, summary.total.retired_ops);
    assert!(summary.total.max_wait < 8);
    for t in 0..64 {
        let g = 3 * 64 + t;
        assert_eq!(Some((g & 0xFF) as u64), top.cores[3].driver.last_load(t));
    }
}

#[test]
fn random_traffic_is_reproducible() {
    let mut spec = pattern("random", "write", 0x8000, 1);
    spec.seed = 11;
    spec.span = 0x4000;
    let run = || {
        let mut top = GridTop::new(&with_patterns(vec![spec.clone()])).unwrap();
        let summary = top.run().unwrap();
        (summary.mesh.local, summary.mesh.neighbor, summary.mesh.denied, summary.cycles)
    };
    let first = run();
    assert_eq!(first, run());
    assert_eq!(1024, first.0 + first.1 + first.2);
}

#[test]
fn gated_bank_holds_threads_until_enabled() {
    let mut top = GridTop::new(&with_patterns(vec![pattern("global_id", "write", 0, 1)])).unwrap();
    top.cores[0].arbiter.set_bank_enabled(2, false);
    for _ in 0..20 {
        top.step().unwrap();
    }
    assert!(!top.cores[0].is_done());
    assert!(top.cores[1].is_done());
    assert_eq!(0, top.cores[0].arbiter.store().load(2).unwrap());

    top.cores[0].arbiter.set_bank_enabled(2, true);
    let summary = top.run().unwrap();
    assert_eq!(20, summary.per_core[0].arbiter.gated);
    assert_eq!(2, top.cores[0].arbiter.store().load(2).unwrap());
}

#[test]
fn tiles_stage_through_dma() {
    let mut top = GridTop::new(&with_patterns(Vec::new())).unwrap();
    let backing = top.tile_backing(2, 1) as usize;
    for i in 0..0x20 {
        top.global.store(backing + i, i as u64 + 1).unwrap();
    }

    top.tile_command(2, TileCommand::Load(1));
    top.tile_command(2, TileCommand::Fence(1));
    step_until(&mut top, 200, |top| top.cores[2].tiles.fence_done(1));
    assert_eq!(TileState::Ready, top.cores[2].tiles.tile_state(1));
    for i in 0..0x20 {
        assert_eq!(Some(i as u64 + 1), top.cores[2].tiles.read(1, i).unwrap());
    }

    // drain back into a cleared staging area
    for i in 0..0x20 {
        top.global.store(backing + i, 0).unwrap();
    }
    top.step().unwrap();
    top.tile_command(2, TileCommand::Fence(1));
    top.step().unwrap();
    top.tile_command(2, TileCommand::Store(1));
    step_until(&mut top, 200, |top| top.cores[2].tiles.tile_state(1) == TileState::Idle);
    for i in 0..0x20 {
        assert_eq!(i as u64 + 1, top.global.load(backing + i).unwrap());
    }
    let summary = top.run().unwrap();
    assert_eq!(1, summary.dma.fills);
    assert_eq!(1, summary.dma.drains);
}

#[test]
fn loading_tile_stays_invisible_until_dma_completes() {
    let mut run = with_patterns(Vec::new());
    run.dma.queue.base_latency = 50;
    let mut top = GridTop::new(&run).unwrap();
    top.tile_command(0, TileCommand::Load(0));
    for _ in 0..40 {
        top.step().unwrap();
        assert_eq!(TileState::Loading, top.cores[0].tiles.tile_state(0));
        assert_eq!(None, top.cores[0].tiles.read(0, 0).unwrap());
    }
    top.run().unwrap();
    assert_eq!(TileState::Ready, top.cores[0].tiles.tile_state(0));
}

#[test]
fn run_times_out() {
    let mut run = quiet(RunConfig::default());
    run.sim.timeout = 5;
    let mut top = GridTop::new(&run).unwrap();
    let err = top.run().unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[test]
fn invalid_grid_is_rejected() {
    let mut run = RunConfig::default();
    run.grid.mesh.width = 3;
    assert!(GridTop::new(&run).is_err());
}

#[test]
fn trace_records_denials() {
    let path = std::env::temp_dir().join(format!("gridx_trace_{}.csv", std::process::id()));
    {
        let mut top = GridTop::new(&quiet(RunConfig::default())).unwrap();
        top.set_trace(TraceSink::create(&path).unwrap());
        top.run().unwrap();
    }
    let text = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    let mut lines = text.lines();
    assert_eq!(Some("cycle,event,unit,id,detail"), lines.next());
    assert_eq!(13 * 64, lines.filter(|l| l.contains(",denied,")).count());
}

#[test]
fn reset_clears_the_grid() {
    let mut top = GridTop::new(&quiet(RunConfig::default())).unwrap();
    let first = top.run().unwrap();
    top.reset();
    assert_eq!(0, top.cycle());
    assert_eq!(0, top.global.load(0xC000 + 5).unwrap());
    assert_eq!(0, top.fabric.slice(GridCoord::new(0, 0)).load(5).unwrap());
    assert_eq!(0, top.summary().mesh.local);

    // the same programs replay from the start
    let again = top.run().unwrap();
    assert_eq!(first.cycles, again.cycles);
    assert_eq!(first.total.retired_ops, again.total.retired_ops);
    assert_eq!(first.mesh.denied, again.mesh.denied);
}

#[test]
fn reset_mid_transfer_drops_dma_work() {
    let mut top = GridTop::new(&with_patterns(Vec::new())).unwrap();
    top.tile_command(0, TileCommand::Load(0));
    for _ in 0..3 {
        top.step().unwrap();
    }
    assert_eq!(TileState::Loading, top.cores[0].tiles.tile_state(0));
    assert!(!top.finished());

    top.reset();
    assert!(top.finished());
    let summary = top.run().unwrap();
    assert_eq!(0, summary.cycles);
    assert_eq!(0, summary.dma.fills);
    assert_eq!(0, summary.dma.bytes_issued);
    assert_eq!(TileState::Idle, top.cores[0].tiles.tile_state(0));
}

#[test]
fn thread_load_waits_for_tile_to_load() {
    // each core's 32 threads read word t of its tile 0
    let tile_base = RunConfig::default().grid.tile.tile_base;
    let mut run = with_patterns(vec![pattern("strided", "read", tile_base, 1)]);
    run.traffic.threads_per_core = 32;
    let mut top = GridTop::new(&run).unwrap();
    for core in 0..16 {
        let backing = top.tile_backing(core, 0) as usize;
        for i in 0..0x20 {
            top.global.store(backing + i, (core + i) as u64 + 1).unwrap();
        }
        top.tile_command(core, TileCommand::Load(0));
    }
    // the bank store behind the tile window is never what a thread sees
    top.cores[0].arbiter.store_mut().store(tile_base as usize, 0x77).unwrap();

    for _ in 0..10 {
        top.step().unwrap();
    }
    for core in 0..16 {
        assert_eq!(TileState::Loading, top.cores[core].tiles.tile_state(0));
        assert!(!top.cores[core].is_done());
        assert_eq!(None, top.cores[core].driver.last_load(0));
    }
    assert!(top.cores[0].tiles.stats.stalled_reads > 0);

    let summary = top.run().unwrap();
    assert_eq!(16 * 32, summary.total.retired_ops);
    assert!(summary.total.retries > 0);
    for core in 0..16 {
        for t in 0..32 {
            assert_eq!(
                Some((core + t) as u64 + 1),
                top.cores[core].driver.last_load(t),
                "core {core} thread {t}"
            );
        }
        assert_eq!(TileState::InUse, top.cores[core].tiles.tile_state(0));
    }
}

#[test]
fn dma_without_throughput_is_rejected() {
    let mut run = quiet(RunConfig::default());
    run.dma.queue.bytes_per_cycle = 0;
    let Err(err) = GridTop::new(&run) else {
        panic!("zero-throughput dma accepted");
    };
    assert!(err.to_string().contains("bytes_per_cycle"), "{err}");

    let mut run = quiet(RunConfig::default());
    run.dma.queue.queue_capacity = 0;
    assert!(GridTop::new(&run).is_err());
}
