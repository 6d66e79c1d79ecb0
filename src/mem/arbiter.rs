use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::ensure;
use log::{debug, trace};
use serde::Serialize;
use smallvec::SmallVec;

use crate::base::behavior::*;
use crate::base::mem::HasMemory;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::mem::slice::MemorySliceStore;
use crate::mem::types::{ReadResponse, Request, RequesterId};
use crate::sim::config::GridConfig;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArbiterStats {
    pub requests: u64,
    pub grants: u64,
    pub reads: u64,
    pub writes: u64,
    pub conflicts: u64,
    pub gated: u64,
    /// Longest run of consecutive conflicted cycles any requester saw before its grant.
    pub max_wait: u64,
    pub bank_grants: Vec<u64>,
    pub bank_conflicts: Vec<u64>,
}

/// Per-requester outcome of one arbitration cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStatus {
    pub grant: bool,
    pub bank_conflict: bool,
    /// Target bank is power gated; neither granted nor conflicted.
    pub gated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ArbitrationResult {
    /// Indexed by requester id. Requesters that issued nothing stay all-false.
    pub lanes: Vec<LaneStatus>,
    /// Indexed by warp. Set only for warps holding a conflicted thread.
    pub warp_stall: Vec<bool>,
}

impl ArbitrationResult {
    pub fn granted(&self, requester: RequesterId) -> bool {
        self.lanes[requester].grant
    }

    pub fn conflicted(&self, requester: RequesterId) -> bool {
        self.lanes[requester].bank_conflict
    }

    pub fn num_grants(&self) -> usize {
        self.lanes.iter().filter(|l| l.grant).count()
    }

    pub fn num_conflicts(&self) -> usize {
        self.lanes.iter().filter(|l| l.bank_conflict).count()
    }
}

#[derive(Debug, Clone)]
struct PendingRead {
    ready_at: Cycle,
    response: ReadResponse,
}

#[derive(Debug, Default)]
pub struct ArbiterState {
    /// Round-robin pointer per bank: the requester id holding top priority next.
    priority: Vec<RequesterId>,
    bank_enabled: Vec<bool>,
    /// Consecutive conflicted cycles per requester.
    waiting: Vec<u64>,
    pending_reads: VecDeque<PendingRead>,
}

/// Resolves one core's simultaneous thread requests against the banks of its
/// private store. Low-order interleaved: `bank = address mod num_banks`. Each bank
/// grants at most one request per cycle, picked round-robin so that N contenders
/// on one bank are each served within N cycles.
pub struct BankArbiter {
    base: ModuleBase<ArbiterState, GridConfig>,
    core_id: usize,
    store: MemorySliceStore,
    pub completions: VecDeque<ReadResponse>,
    pub stats: ArbiterStats,
}

impl BankArbiter {
    pub fn new(config: Arc<GridConfig>, core_id: usize) -> Self {
        let num_banks = config.mem.num_banks;
        let num_requesters = config.mem.num_requesters;
        let mut me = Self {
            base: ModuleBase::with_state(ArbiterState {
                priority: vec![0; num_banks],
                bank_enabled: vec![true; num_banks],
                waiting: vec![0; num_requesters],
                pending_reads: VecDeque::new(),
            }),
            core_id,
            store: MemorySliceStore::new(config.mem.sram_base as usize, config.data_mask()),
            completions: VecDeque::new(),
            stats: ArbiterStats {
                bank_grants: vec![0; num_banks],
                bank_conflicts: vec![0; num_banks],
                ..ArbiterStats::default()
            },
        };
        me.init_conf(config);
        me
    }

    pub fn bank_of(&self, address: u64) -> usize {
        (address % self.conf().mem.num_banks as u64) as usize
    }

    pub fn set_bank_enabled(&mut self, bank: usize, enabled: bool) {
        if self.state().bank_enabled[bank] != enabled {
            debug!(
                "core {} bank {}: power {}",
                self.core_id,
                bank,
                if enabled { "enabled" } else { "gated" }
            );
        }
        self.state_mut().bank_enabled[bank] = enabled;
    }

    pub fn bank_enabled(&self, bank: usize) -> bool {
        self.state().bank_enabled[bank]
    }

    /// Requester currently holding top priority on `bank`.
    pub fn priority(&self, bank: usize) -> RequesterId {
        self.state().priority[bank]
    }

    pub fn store(&self) -> &MemorySliceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MemorySliceStore {
        &mut self.store
    }

    /// Arbitrate this cycle's requests. Granted stores land in the private store
    /// immediately; granted loads are queued and show up in `completions` after
    /// `read_latency` cycles. Losers must be re-issued by the caller.
    pub fn arbitrate(&mut self, requests: &[Request]) -> anyhow::Result<ArbitrationResult> {
        let num_banks = self.conf().mem.num_banks;
        let num_requesters = self.conf().mem.num_requesters;
        let threads_per_warp = self.conf().mem.threads_per_warp;
        let read_latency = self.conf().mem.read_latency;
        let num_warps = self.conf().num_warps();
        let now = self.now();

        let mut result = ArbitrationResult {
            lanes: vec![LaneStatus::default(); num_requesters],
            warp_stall: vec![false; num_warps],
        };

        // validate the whole cycle before touching any state
        let words = self.store.words() as u64;
        for req in requests {
            ensure!(
                req.address < words,
                "core {} requester {}: address {:#x} outside private store of {:#x} words",
                self.core_id,
                req.requester_id,
                req.address,
                words
            );
        }

        let mut issued = vec![false; num_requesters];
        let mut by_bank: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); num_banks];
        for (idx, req) in requests.iter().enumerate() {
            assert!(
                req.requester_id < num_requesters,
                "requester {} out of range ({} requesters)",
                req.requester_id,
                num_requesters
            );
            assert!(
                !issued[req.requester_id],
                "requester {} issued twice in one cycle",
                req.requester_id
            );
            issued[req.requester_id] = true;
            self.stats.requests += 1;

            let bank = self.bank_of(req.address);
            if !self.state().bank_enabled[bank] {
                result.lanes[req.requester_id].gated = true;
                self.stats.gated += 1;
                continue;
            }
            by_bank[bank].push(idx);
        }

        for (bank, contenders) in by_bank.iter().enumerate() {
            if contenders.is_empty() {
                continue;
            }
            let ptr = self.state().priority[bank];
            let rank = |idx: usize| (requests[idx].requester_id + num_requesters - ptr) % num_requesters;
            let winner_idx = *contenders
                .iter()
                .min_by_key(|&&idx| rank(idx))
                .expect("non-empty contender list");
            let winner = requests[winner_idx];

            if contenders.len() > 1 {
                debug!(
                    "core {} bank {}: {}-way conflict, granting requester {}",
                    self.core_id,
                    bank,
                    contenders.len(),
                    winner.requester_id
                );
            }
            for &idx in contenders.iter().filter(|&&idx| idx != winner_idx) {
                let loser = requests[idx].requester_id;
                result.lanes[loser].bank_conflict = true;
                result.warp_stall[loser / threads_per_warp] = true;
                self.state_mut().waiting[loser] += 1;
                self.stats.conflicts += 1;
                self.stats.bank_conflicts[bank] += 1;
            }

            result.lanes[winner.requester_id].grant = true;
            let waited = std::mem::take(&mut self.state_mut().waiting[winner.requester_id]);
            self.stats.max_wait = self.stats.max_wait.max(waited);
            self.stats.grants += 1;
            self.stats.bank_grants[bank] += 1;
            self.state_mut().priority[bank] = (winner.requester_id + 1) % num_requesters;

            let offset = winner.address as usize;
            if winner.is_write {
                let data = winner.data.unwrap_or_default();
                self.store.store(offset, data)?;
                self.stats.writes += 1;
                trace!(
                    "core {} requester {}: store {:#x} <- {:#x}",
                    self.core_id,
                    winner.requester_id,
                    winner.address,
                    data
                );
            } else {
                let data = self.store.load(offset)?;
                self.stats.reads += 1;
                self.state_mut().pending_reads.push_back(PendingRead {
                    ready_at: now + read_latency,
                    response: ReadResponse {
                        requester_id: winner.requester_id,
                        address: winner.address,
                        data,
                    },
                });
            }
        }

        for (requester, was_issued) in issued.iter().enumerate() {
            if !was_issued {
                self.state_mut().waiting[requester] = 0;
            }
        }

        self.deliver_reads();
        Ok(result)
    }

    pub fn pop_completion(&mut self) -> Option<ReadResponse> {
        self.completions.pop_front()
    }

    pub fn has_inflight(&self) -> bool {
        !self.state().pending_reads.is_empty()
    }

    fn deliver_reads(&mut self) {
        let now = self.now();
        while let Some(front) = self.base.state.pending_reads.front() {
            if front.ready_at > now {
                break;
            }
            let read = self.base.state.pending_reads.pop_front().expect("front just checked");
            self.completions.push_back(read.response);
        }
    }
}

module!(BankArbiter, ArbiterState, GridConfig,);

impl ModuleBehaviors for BankArbiter {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        self.deliver_reads();
    }

    fn reset(&mut self) {
        let num_banks = self.conf().mem.num_banks;
        let num_requesters = self.conf().mem.num_requesters;
        let state = self.state_mut();
        state.priority = vec![0; num_banks];
        state.bank_enabled = vec![true; num_banks];
        state.waiting = vec![0; num_requesters];
        state.pending_reads.clear();
        self.completions.clear();
        self.store.reset();
        self.base.cycle = 0;
    }
}
