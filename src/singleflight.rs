use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

type Inflight<K, V> = Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>>;

/// 对相同 key 的并发任务去重：同一时刻只执行一次，后来的调用者等待同一个结果
pub struct SingleFlight<K, V> {
    inflight: Inflight<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行 `work`，如果相同 key 的任务正在执行则直接等待它的结果
    ///
    /// 返回值的第二项表示本次调用是否复用了其他调用者的结果
    pub async fn run<F>(&self, key: K, work: F) -> (V, bool)
    where
        F: Future<Output = V> + Send + 'static,
    {
        let (shared, joined) = {
            let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&key) {
                Some(shared) => (shared.clone(), true),
                None => {
                    // 任务完成时自行从表中移除，之后的调用会重新执行
                    let inflight = self.inflight.clone();
                    let k = key.clone();
                    let shared = async move {
                        let value = work.await;
                        inflight.lock().unwrap_or_else(PoisonError::into_inner).remove(&k);
                        value
                    }
                    .boxed()
                    .shared();
                    map.insert(key.clone(), shared.clone());
                    (shared, false)
                }
            }
        };
        let mut waiter = Waiter { inflight: self.inflight.clone(), key, shared };
        ((&mut waiter.shared).await, joined)
    }

    /// 正在执行的任务数量
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 等待者句柄，最后一个等待者放弃时把未完成的任务移出表
struct Waiter<K: Eq + Hash, V: Clone> {
    inflight: Inflight<K, V>,
    key: K,
    shared: Shared<BoxFuture<'static, V>>,
}

impl<K: Eq + Hash, V: Clone> Drop for Waiter<K, V> {
    fn drop(&mut self) {
        // 已完成的 Shared 返回 None
        if self.shared.strong_count().is_none() {
            return;
        }
        // 新的等待者只会在持有锁时克隆，2 = 本句柄 + 表中的一份
        let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.strong_count() == Some(2) && map.get(&self.key).is_some_and(|s| s.ptr_eq(&self.shared)) {
            let abandoned = map.remove(&self.key);
            // 在锁外析构被放弃的任务
            drop(map);
            drop(abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let flight = SingleFlight::<&'static str, usize>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let work = |counter: Arc<AtomicUsize>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst) + 1
        };

        let (a, b) = tokio::join!(
            flight.run("same", work(counter.clone())),
            flight.run("same", work(counter.clone())),
        );
        assert_eq!(a.0, 1);
        assert_eq!(b.0, 1);
        assert!(a.1 ^ b.1, "exactly one caller should join");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(flight.is_empty());

        // 完成之后再次调用会重新执行
        let (c, joined) = flight.run("same", work(counter.clone())).await;
        assert_eq!(c, 2);
        assert!(!joined);
    }

    #[tokio::test]
    async fn abandoned_work_is_dropped() {
        let flight = SingleFlight::<u32, u32>::new();
        let cancelled = tokio::time::timeout(Duration::from_millis(50), flight.run(1, std::future::pending())).await;
        assert!(cancelled.is_err());
        assert!(flight.is_empty());

        // 重试执行自己的任务，而不是等待已被放弃的那个
        let retry = tokio::time::timeout(Duration::from_millis(200), flight.run(1, async { 7 })).await;
        assert_eq!(retry.unwrap(), (7, false));
    }

    #[tokio::test]
    async fn one_waiter_leaving_keeps_the_work_alive() {
        let flight = SingleFlight::<u32, u32>::new();
        let work = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            3
        };
        let (cancelled, kept) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(20), flight.run(1, work)),
            flight.run(1, async { 4 }),
        );
        assert!(cancelled.is_err());
        assert_eq!(kept, (3, true));
        assert!(flight.is_empty());
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let flight = SingleFlight::<u32, u32>::new();
        let (a, b) = tokio::join!(flight.run(1, async { 10 }), flight.run(2, async { 20 }));
        assert_eq!((a.0, b.0), (10, 20));
        assert!(!a.1 && !b.1);
    }
}
