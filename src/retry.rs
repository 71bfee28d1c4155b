// ===============================
// src/retry.rs
// ===============================
//
// Antrian retry dengan backoff eksponensial + jitter (pola sama dengan reconnect di feed.rs).
// Entry yang gagal terus setelah `max_attempts` dipindah ke `escalated`
// dan tidak dicoba otomatis lagi, tapi tetap tersimpan untuk operator.
//
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 20, base_ms: 1_000, max_ms: 300_000, jitter_ms: 250 }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failures.
    pub fn delay(&self, attempts: u32) -> Duration {
        let shift = attempts.min(20);
        let factor = 1u64 << shift;
        let base = self.base_ms.saturating_mul(factor).min(self.max_ms);
        let jitter = if self.jitter_ms > 0 { rand::thread_rng().gen_range(0..=self.jitter_ms) } else { 0 };
        Duration::milliseconds((base + jitter) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry<T> {
    pub id: u64,
    pub job: T,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Rescheduled(u32),
    Escalated(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueue<T> {
    next_id: u64,
    entries: Vec<RetryEntry<T>>,
    escalated: Vec<RetryEntry<T>>,
}

impl<T> Default for RetryQueue<T> {
    fn default() -> Self { Self { next_id: 1, entries: Vec::new(), escalated: Vec::new() } }
}

impl<T: Clone> RetryQueue<T> {
    /// Queue a job whose first attempt already failed; first retry is due now.
    pub fn push(&mut self, job: T, now: DateTime<Utc>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(RetryEntry { id, job, queued_at: now, attempts: 0, next_attempt_at: now });
        id
    }

    /// Snapshot of entries due at `now`, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<RetryEntry<T>> {
        self.entries.iter().filter(|e| e.next_attempt_at <= now).cloned().collect()
    }

    /// Drop an entry after its retried operation succeeded.
    pub fn complete(&mut self, id: u64) -> Option<RetryEntry<T>> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn fail(&mut self, id: u64, now: DateTime<Utc>, policy: &RetryPolicy) -> Option<Backoff> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entry = &mut self.entries[pos];
        entry.attempts += 1;
        if entry.attempts >= policy.max_attempts {
            let e = self.entries.remove(pos);
            let n = e.attempts;
            self.escalated.push(e);
            return Some(Backoff::Escalated(n));
        }
        entry.next_attempt_at = now + policy.delay(entry.attempts);
        Some(Backoff::Rescheduled(entry.attempts))
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn entries(&self) -> &[RetryEntry<T>] { &self.entries }
    pub fn escalated(&self) -> &[RetryEntry<T>] { &self.escalated }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_ms: 1_000, max_ms: 8_000, jitter_ms: 0 }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay(0), Duration::milliseconds(1_000));
        assert_eq!(p.delay(1), Duration::milliseconds(2_000));
        assert_eq!(p.delay(3), Duration::milliseconds(8_000));
        assert_eq!(p.delay(9), Duration::milliseconds(8_000));
    }

    #[test]
    fn failed_entry_is_not_due_until_backoff_elapses() {
        let now = Utc::now();
        let mut q = RetryQueue::default();
        let id = q.push("abc".to_string(), now);
        assert_eq!(q.due(now).len(), 1);

        assert_eq!(q.fail(id, now, &policy(5)), Some(Backoff::Rescheduled(1)));
        assert!(q.due(now).is_empty());
        assert_eq!(q.due(now + Duration::seconds(2)).len(), 1);

        assert!(q.complete(id).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn exhausted_entry_escalates_and_is_kept() {
        let now = Utc::now();
        let mut q = RetryQueue::default();
        let id = q.push(7u32, now);
        assert_eq!(q.fail(id, now, &policy(2)), Some(Backoff::Rescheduled(1)));
        assert_eq!(q.fail(id, now, &policy(2)), Some(Backoff::Escalated(2)));
        assert!(q.is_empty());
        assert_eq!(q.escalated().len(), 1);
        assert_eq!(q.escalated()[0].job, 7);
    }
}
