use dashmap::DashMap;

/// Reference-counted room membership.
///
/// Only the first `acquire` and the last matching `release` of a key report
/// `true`, which is when the caller should emit subscribe/unsubscribe.
#[derive(Debug, Default)]
pub struct Subscriptions {
    counts: DashMap<String, usize>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: &str) -> bool {
        let mut count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Releases beyond the number of acquires are ignored.
    pub fn release(&self, key: &str) -> bool {
        let mut last = false;
        if let Some(mut count) = self.counts.get_mut(key) {
            *count = count.saturating_sub(1);
            last = *count == 0;
        }
        if last {
            self.counts.remove_if(key, |_, count| *count == 0);
        }
        last
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).map(|c| *c).unwrap_or(0)
    }

    /// Keys with at least one holder.
    pub fn active(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
