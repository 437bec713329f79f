//! Per-ticker rolling windows (1m / 5m / 60m / 24h)
//!
//! Every ticker owns four `WindowAggregate`s. A trade is recorded into all of
//! them at once; each window then evicts from the front anything that fell out
//! of `(latest - duration, latest]`, where `latest` is the newest `occurred_at`
//! recorded for that ticker. Eviction runs on `record` and on `snapshot`, never
//! on a timer.
//!
//! Size statistics (median / MAD) are served from a counted multiset of trade
//! sizes that is updated on insert and evict and answers rank queries along a
//! single trie path, so a snapshot never rescans the trade sequence.

use super::config::WindowDurations;
use super::types::TradeEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSize {
    Min1,
    Min5,
    Min60,
    Hour24,
}

impl WindowSize {
    pub fn all() -> [WindowSize; 4] {
        [
            WindowSize::Min1,
            WindowSize::Min5,
            WindowSize::Min60,
            WindowSize::Hour24,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowSize::Min1 => "1m",
            WindowSize::Min5 => "5m",
            WindowSize::Min60 => "60m",
            WindowSize::Hour24 => "24h",
        }
    }

    fn index(&self) -> usize {
        match self {
            WindowSize::Min1 => 0,
            WindowSize::Min5 => 1,
            WindowSize::Min60 => 2,
            WindowSize::Hour24 => 3,
        }
    }

    pub fn duration_secs(&self, durations: &WindowDurations) -> i64 {
        match self {
            WindowSize::Min1 => durations.short_secs,
            WindowSize::Min5 => durations.medium_secs,
            WindowSize::Min60 => durations.hourly_secs,
            WindowSize::Hour24 => durations.daily_secs,
        }
    }
}

const SIZE_BITS: u32 = u64::BITS;
const NIL: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct TrieNode {
    children: [usize; 2],
    count: usize,
}

/// Counted multiset of trade sizes with rank queries
///
/// A binary trie over the 64 bits of each size, every node carrying the number
/// of stored sizes below it. `kth` and `count_below` walk one root-to-leaf path,
/// so the median is two rank queries and the MAD is a binary search over the
/// deviation using range counts. Node 0 is the root and doubles as the null
/// child index; emptied subtrees go back on a free list.
#[derive(Debug, Clone)]
pub struct SizeMultiset {
    nodes: Vec<TrieNode>,
    free: Vec<usize>,
}

impl Default for SizeMultiset {
    fn default() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            free: Vec::new(),
        }
    }
}

impl SizeMultiset {
    pub fn insert(&mut self, size: u64) {
        let mut node = 0;
        self.nodes[node].count += 1;
        for bit in (0..SIZE_BITS).rev() {
            let branch = ((size >> bit) & 1) as usize;
            let mut child = self.nodes[node].children[branch];
            if child == NIL {
                child = self.alloc();
                self.nodes[node].children[branch] = child;
            }
            self.nodes[child].count += 1;
            node = child;
        }
    }

    /// Remove one occurrence of `size`; absent sizes are ignored
    pub fn remove(&mut self, size: u64) {
        if self.count_in(size, size) == 0 {
            return;
        }
        let mut node = 0;
        self.nodes[node].count -= 1;
        for bit in (0..SIZE_BITS).rev() {
            let branch = ((size >> bit) & 1) as usize;
            let child = self.nodes[node].children[branch];
            self.nodes[child].count -= 1;
            if self.nodes[child].count == 0 {
                self.nodes[node].children[branch] = NIL;
                self.release(child);
                return;
            }
            node = child;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes[0].count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Median of the stored sizes (mean of the two middle values when even)
    pub fn median(&self) -> Option<f64> {
        let (lo, hi) = self.middle()?;
        Some((lo as f64 + hi as f64) / 2.0)
    }

    /// Raw median absolute deviation around the median
    pub fn mad(&self) -> Option<f64> {
        let (lo, hi) = self.middle()?;
        // deviations are searched in half-units so a half-integer median stays exact
        let center2 = lo as i128 + hi as i128;
        let len = self.len();
        let lo_dev = self.kth_deviation2(center2, (len - 1) / 2);
        let hi_dev = self.kth_deviation2(center2, len / 2);
        Some((lo_dev + hi_dev) as f64 / 4.0)
    }

    fn middle(&self) -> Option<(u64, u64)> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        Some((self.kth((len - 1) / 2), self.kth(len / 2)))
    }

    /// Size at 0-based `rank` in ascending order; `rank < len`
    fn kth(&self, mut rank: usize) -> u64 {
        let mut node = 0;
        let mut value = 0u64;
        for bit in (0..SIZE_BITS).rev() {
            let [left, right] = self.nodes[node].children;
            let left_count = self.count_of(left);
            if rank < left_count {
                node = left;
            } else {
                rank -= left_count;
                node = right;
                value |= 1 << bit;
            }
        }
        value
    }

    /// Number of stored sizes strictly below `bound`
    fn count_below(&self, bound: u64) -> usize {
        let mut node = 0;
        let mut below = 0;
        for bit in (0..SIZE_BITS).rev() {
            let [left, right] = self.nodes[node].children;
            if (bound >> bit) & 1 == 1 {
                below += self.count_of(left);
                node = right;
            } else {
                node = left;
            }
            if node == NIL {
                break;
            }
        }
        below
    }

    /// Number of stored sizes in `[lo, hi]`
    fn count_in(&self, lo: u64, hi: u64) -> usize {
        if lo > hi {
            return 0;
        }
        let up_to_hi = match hi.checked_add(1) {
            Some(bound) => self.count_below(bound),
            None => self.len(),
        };
        up_to_hi - self.count_below(lo)
    }

    /// Number of sizes `x` with `|2x - center2| <= dev2`
    fn count_within2(&self, center2: i128, dev2: i128) -> usize {
        let lo = (center2 - dev2 + 1).div_euclid(2).max(0);
        let hi = (center2 + dev2).div_euclid(2).min(u64::MAX as i128);
        if lo > hi {
            return 0;
        }
        self.count_in(lo as u64, hi as u64)
    }

    /// Doubled deviation at 0-based `rank` among all `|2x - center2|`
    fn kth_deviation2(&self, center2: i128, rank: usize) -> i128 {
        let min2 = 2 * self.kth(0) as i128;
        let max2 = 2 * self.kth(self.len() - 1) as i128;
        let mut lo = 0i128;
        let mut hi = (center2 - min2).max(max2 - center2).max(0);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.count_within2(center2, mid) > rank {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    fn count_of(&self, node: usize) -> usize {
        if node == NIL {
            0
        } else {
            self.nodes[node].count
        }
    }

    fn alloc(&mut self) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = TrieNode::default();
                index
            }
            None => {
                self.nodes.push(TrieNode::default());
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, root: usize) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for child in self.nodes[node].children {
                if child != NIL {
                    stack.push(child);
                }
            }
            self.free.push(node);
        }
    }
}

/// Trades of one ticker inside one window duration, ordered by `occurred_at`
#[derive(Debug, Clone)]
pub struct WindowAggregate {
    duration: Duration,
    trades: VecDeque<Arc<TradeEvent>>,
    size_sum: u64,
    sizes: SizeMultiset,
}

impl WindowAggregate {
    pub fn new(duration_secs: i64) -> Self {
        Self {
            duration: Duration::seconds(duration_secs),
            trades: VecDeque::new(),
            size_sum: 0,
            sizes: SizeMultiset::default(),
        }
    }

    /// Insert at the time-ordered position. Returns false if the trade is
    /// already outside the window relative to `latest`.
    fn insert(&mut self, trade: Arc<TradeEvent>, latest: DateTime<Utc>) -> bool {
        if trade.occurred_at <= latest - self.duration {
            return false;
        }
        let pos = self
            .trades
            .partition_point(|t| t.occurred_at <= trade.occurred_at);
        self.size_sum = self.size_sum.saturating_add(trade.size);
        self.sizes.insert(trade.size);
        self.trades.insert(pos, trade);
        true
    }

    /// Drop everything at or before `latest - duration`
    fn evict(&mut self, latest: DateTime<Utc>) -> usize {
        let cutoff = latest - self.duration;
        let mut evicted = 0;
        while let Some(front) = self.trades.front() {
            if front.occurred_at > cutoff {
                break;
            }
            if let Some(old) = self.trades.pop_front() {
                self.size_sum = self.size_sum.saturating_sub(old.size);
                self.sizes.remove(old.size);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn size_sum(&self) -> u64 {
        self.size_sum
    }

    pub fn median_size(&self) -> Option<f64> {
        self.sizes.median()
    }

    pub fn mad_size(&self) -> Option<f64> {
        self.sizes.mad()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.trades.front().map(|t| t.occurred_at)
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.trades.back().map(|t| t.occurred_at)
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeEvent> {
        self.trades.iter().map(|t| t.as_ref())
    }
}

#[derive(Debug, Clone)]
struct TickerWindows {
    /// Eviction clock: newest `occurred_at` recorded, never rewinds
    latest: DateTime<Utc>,
    windows: [WindowAggregate; 4],
}

impl TickerWindows {
    fn new(durations: &WindowDurations, latest: DateTime<Utc>) -> Self {
        Self {
            latest,
            windows: WindowSize::all().map(|w| WindowAggregate::new(w.duration_secs(durations))),
        }
    }

    fn evict_all(&mut self) {
        let latest = self.latest;
        for window in self.windows.iter_mut() {
            window.evict(latest);
        }
    }
}

/// Owner of every ticker's windows
///
/// Tickers are created lazily on their first trade and removed by
/// `prune_inactive` once they have been silent longer than the daily window.
#[derive(Debug, Clone)]
pub struct WindowStore {
    durations: WindowDurations,
    tickers: HashMap<String, TickerWindows>,
    newest_seen: Option<DateTime<Utc>>,
}

impl WindowStore {
    pub fn new(durations: WindowDurations) -> Self {
        Self {
            durations,
            tickers: HashMap::new(),
            newest_seen: None,
        }
    }

    /// Insert a trade into all four windows of its ticker
    pub fn record(&mut self, trade: &TradeEvent) {
        let durations = self.durations;
        let entry = self
            .tickers
            .entry(trade.ticker.clone())
            .or_insert_with(|| TickerWindows::new(&durations, trade.occurred_at));

        if trade.occurred_at > entry.latest {
            entry.latest = trade.occurred_at;
        }

        let shared = Arc::new(trade.clone());
        let latest = entry.latest;
        for window in entry.windows.iter_mut() {
            window.insert(Arc::clone(&shared), latest);
        }
        entry.evict_all();

        self.newest_seen = Some(match self.newest_seen {
            Some(seen) if seen >= trade.occurred_at => seen,
            _ => trade.occurred_at,
        });
    }

    /// Currently valid aggregate for `ticker` in `window`, or None for an unseen ticker
    pub fn snapshot(&mut self, ticker: &str, window: WindowSize) -> Option<&WindowAggregate> {
        let entry = self.tickers.get_mut(ticker)?;
        let latest = entry.latest;
        let aggregate = &mut entry.windows[window.index()];
        aggregate.evict(latest);
        Some(aggregate)
    }

    pub fn latest_seen(&self, ticker: &str) -> Option<DateTime<Utc>> {
        self.tickers.get(ticker).map(|t| t.latest)
    }

    /// Newest `occurred_at` across all tickers
    pub fn newest_seen(&self) -> Option<DateTime<Utc>> {
        self.newest_seen
    }

    /// Drop tickers whose latest trade is at or before `reference - daily window`
    pub fn prune_inactive(&mut self, reference: DateTime<Utc>) -> usize {
        let cutoff = reference - Duration::seconds(self.durations.daily_secs);
        let before = self.tickers.len();
        self.tickers.retain(|_, t| t.latest > cutoff);
        before - self.tickers.len()
    }

    pub fn ticker_count(&self) -> usize {
        self.tickers.len()
    }

    pub fn durations(&self) -> &WindowDurations {
        &self.durations
    }
}
