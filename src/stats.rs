use core::sync::atomic::{AtomicI64, Ordering};

// Process-wide byte and call counters, updated from the OS layer and the
// page-expansion path. Aggregates only; individual allocations are never
// tracked.

pub struct StatCount {
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub peak: AtomicI64,
    pub current: AtomicI64,
}

impl StatCount {
    const fn new() -> StatCount {
        StatCount {
            allocated: AtomicI64::new(0),
            freed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            current: AtomicI64::new(0),
        }
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

pub struct Stats {
    pub reserved: StatCount,
    pub committed: StatCount,
    pub commit_calls: StatCount,
    pub pages_committed: StatCount,
}

pub static STATS: Stats = Stats {
    reserved: StatCount::new(),
    committed: StatCount::new(),
    commit_calls: StatCount::new(),
    pages_committed: StatCount::new(),
};

pub fn increase(stat: &StatCount, amount: i64) {
    update(stat, amount);
}

pub fn decrease(stat: &StatCount, amount: i64) {
    update(stat, -amount);
}

fn update(stat: &StatCount, amount: i64) {
    if amount == 0 {
        return;
    }
    let current = stat.current.fetch_add(amount, Ordering::Relaxed) + amount;
    stat.peak.fetch_max(current, Ordering::Relaxed);
    if amount > 0 {
        stat.allocated.fetch_add(amount, Ordering::Relaxed);
    } else {
        stat.freed.fetch_add(-amount, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the process-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub reserved: i64,
    pub committed: i64,
    pub committed_peak: i64,
    pub commit_calls: i64,
    pub pages_committed: i64,
}

/// Reads the current counter values.
pub fn snapshot() -> StatsSnapshot {
    StatsSnapshot {
        reserved: STATS.reserved.current(),
        committed: STATS.committed.current(),
        committed_peak: STATS.committed.peak(),
        commit_calls: STATS.commit_calls.current(),
        pages_committed: STATS.pages_committed.current(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_high_water_mark() {
        let stat = StatCount::new();
        increase(&stat, 100);
        increase(&stat, 50);
        decrease(&stat, 120);
        increase(&stat, 10);
        assert_eq!(stat.current(), 40);
        assert_eq!(stat.peak(), 150);
        assert_eq!(stat.allocated.load(Ordering::Relaxed), 160);
        assert_eq!(stat.freed.load(Ordering::Relaxed), 120);
    }
}
