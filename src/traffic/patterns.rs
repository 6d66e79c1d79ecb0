use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Write,
}

impl PatternOp {
    pub fn is_store(self) -> bool {
        matches!(self, Self::Write)
    }

    fn short(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
        }
    }
}

#[derive(Debug, Clone)]
enum PatternKind {
    /// `base + g * stride` with `g` the thread's global id
    GlobalId { stride: u64 },
    /// `base + t * stride` with `t` the thread's index inside its core
    Strided { stride: u64 },
    Random { span: u64, seed: u64 },
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub op: PatternOp,
    base: u64,
    kind: PatternKind,
}

/// One memory operation of a thread program. Stores write the thread's global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadOp {
    pub pattern: usize,
    pub address: u64,
    pub op: PatternOp,
    pub data: u64,
}

/// Expands the configured patterns into one program per thread. Thread `t` of core `c`
/// has global id `g = c * threads_per_core + t`.
#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    threads_per_core: usize,
    total_threads: usize,
    random_tables: Vec<Option<Vec<u64>>>, // indexed by global thread id
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig, num_cores: usize) -> anyhow::Result<Self> {
        let threads_per_core = config.threads_per_core;
        let total_threads = threads_per_core * num_cores;
        let patterns = config
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, spec)| compile_pattern(spec, idx))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let random_tables = precompute_random_tables(&patterns, total_threads);
        Ok(Self {
            patterns,
            threads_per_core,
            total_threads,
            random_tables,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn threads_per_core(&self) -> usize {
        self.threads_per_core
    }

    pub fn total_threads(&self) -> usize {
        self.total_threads
    }

    pub fn pattern_name(&self, idx: usize) -> Option<&str> {
        self.patterns.get(idx).map(|p| p.name.as_str())
    }

    pub fn global_id(&self, core: usize, thread: usize) -> usize {
        core * self.threads_per_core + thread
    }

    pub fn thread_addr(&self, pattern_idx: usize, core: usize, thread: usize) -> Option<u64> {
        let pattern = self.patterns.get(pattern_idx)?;
        let gid = self.global_id(core, thread);
        let offset = match pattern.kind {
            PatternKind::GlobalId { stride } => gid as u64 * stride,
            PatternKind::Strided { stride } => thread as u64 * stride,
            PatternKind::Random { .. } => {
                *self.random_tables.get(pattern_idx)?.as_ref()?.get(gid)?
            }
        };
        Some(pattern.base.saturating_add(offset))
    }

    /// The thread's operations in pattern order.
    pub fn program(&self, core: usize, thread: usize) -> Vec<ThreadOp> {
        let gid = self.global_id(core, thread) as u64;
        (0..self.patterns.len())
            .filter_map(|idx| {
                let address = self.thread_addr(idx, core, thread)?;
                Some(ThreadOp {
                    pattern: idx,
                    address,
                    op: self.patterns[idx].op,
                    data: gid,
                })
            })
            .collect()
    }
}

// one stream per pattern, drawn in global thread order
fn precompute_random_tables(patterns: &[CompiledPattern], total_threads: usize) -> Vec<Option<Vec<u64>>> {
    patterns
        .iter()
        .map(|pattern| match pattern.kind {
            PatternKind::Random { span, seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                Some((0..total_threads).map(|_| rng.gen_range(0..span)).collect())
            }
            _ => None,
        })
        .collect()
}

fn compile_pattern(spec: &TrafficPatternSpec, index: usize) -> anyhow::Result<CompiledPattern> {
    let kind_key = spec.kind.trim().to_ascii_lowercase();
    let op = parse_op(&spec.op)?;

    let kind = match kind_key.as_str() {
        "global_id" | "gid" => PatternKind::GlobalId { stride: spec.stride },
        "strided" => PatternKind::Strided { stride: spec.stride },
        "random" => PatternKind::Random {
            span: spec.span.max(1),
            seed: spec.seed,
        },
        other => bail!(
            "unsupported traffic pattern kind '{}' at index {} (expected global_id|strided|random)",
            other,
            index
        ),
    };

    let name = if spec.name.is_empty() {
        default_pattern_name(&kind, spec.base, op)
    } else {
        spec.name.clone()
    };

    Ok(CompiledPattern {
        name,
        op,
        base: spec.base,
        kind,
    })
}

fn parse_op(op: &str) -> anyhow::Result<PatternOp> {
    match op.trim().to_ascii_lowercase().as_str() {
        "read" | "r" | "load" => Ok(PatternOp::Read),
        "write" | "w" | "store" => Ok(PatternOp::Write),
        other => bail!("unsupported traffic op '{}'; expected read/write", other),
    }
}

fn default_pattern_name(kind: &PatternKind, base: u64, op: PatternOp) -> String {
    let kind = match kind {
        PatternKind::GlobalId { stride } => format!("gid({})", stride),
        PatternKind::Strided { stride } => format!("strided({})", stride),
        PatternKind::Random { seed, .. } => format!("random({})", seed),
    };
    format!("{}@{:#x}_{}", kind, base, op.short())
}
