/*
 * Created on Thu Jul 02 2020
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2020, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Per-database lock registry: a shared acquire (query) permits multiple
//! concurrent readers; an exclusive acquire (ingest, restore) excludes everyone.
//! Writers are admitted in FIFO order among themselves; a queued writer blocks
//! new readers from joining so a steady stream of queries can't starve it out.
//! Wakeups are polled rather than condvar-signaled, same as the registry this is
//! grounded on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ResourceState {
    running: usize,
    running_exclusive: bool,
    queued_writers: BTreeSet<u64>,
    next_ticket: u64,
}

/// One registry per worker process; a worker only ever opens one database at a
/// time per request, but multiple requests against the same database race here.
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<parking_lot::Mutex<HashMap<String, ResourceState>>>,
}

pub struct LockGuard {
    registry: LockRegistry,
    resource: String,
    exclusive: bool,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `resource` for shared (query) or exclusive (ingest/restore) use.
    /// Resolves once admitted; holds the slot until the returned guard drops.
    pub async fn acquire(&self, resource: &str, exclusive: bool) -> LockGuard {
        let my_ticket = if exclusive {
            let mut map = self.inner.lock();
            let st = map.entry(resource.to_owned()).or_default();
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            st.queued_writers.insert(ticket);
            Some(ticket)
        } else {
            self.inner.lock().entry(resource.to_owned()).or_default();
            None
        };

        loop {
            {
                let mut map = self.inner.lock();
                let st = map.get_mut(resource).expect("entry inserted above");
                let admitted = if exclusive {
                    st.running == 0 && st.queued_writers.iter().next() == my_ticket.as_ref()
                } else {
                    !st.running_exclusive && st.queued_writers.is_empty()
                };
                if admitted {
                    if exclusive {
                        st.queued_writers.remove(&my_ticket.unwrap());
                    }
                    st.running += 1;
                    st.running_exclusive = exclusive;
                    break;
                }
            }
            time::sleep(POLL_INTERVAL).await;
        }

        LockGuard { registry: self.clone(), resource: resource.to_owned(), exclusive }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut map = self.registry.inner.lock();
        if let Some(st) = map.get_mut(&self.resource) {
            st.running -= 1;
            if st.running == 0 {
                st.running_exclusive = false;
            }
            if st.running == 0 && st.queued_writers.is_empty() {
                map.remove(&self.resource);
            }
        }
        let _ = self.exclusive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn shared_acquires_run_concurrently() {
        let reg = LockRegistry::new();
        let g1 = reg.acquire("DB", false).await;
        let g2 = reg.acquire("DB", false).await;
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn exclusive_excludes_readers_until_released() {
        let reg = LockRegistry::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let writer_guard = reg.acquire("DB", true).await;
        let reg2 = reg.clone();
        let concurrent2 = concurrent.clone();
        let max2 = max_concurrent.clone();
        let reader = tokio::spawn(async move {
            let _g = reg2.acquire("DB", false).await;
            let n = concurrent2.fetch_add(1, Ordering::SeqCst) + 1;
            max2.fetch_max(n, Ordering::SeqCst);
            concurrent2.fetch_sub(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 0);
        drop(writer_guard);
        reader.await.unwrap();
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
