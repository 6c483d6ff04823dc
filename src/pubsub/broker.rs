use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, trace, warn};

use subpub_error::{BrokerError, BrokerResult};

use super::{
    stats::Counters, subscription::Shared, worker::Worker, BrokerStats, MessageHandler,
    Subscription,
};

/// Порог очереди подписчика по умолчанию, после которого брокер
/// предупреждает в логе.
pub const DEFAULT_BACKLOG_WARN_THRESHOLD: usize = 1024;

/// Настройки брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Глубина очереди одного подписчика, при достижении которой пишется
    /// `warn`. Очередь не ограничена: сообщения не теряются, порог только
    /// сигнализирует о медленном обработчике. Минимум 1.
    pub backlog_warn_threshold: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backlog_warn_threshold: DEFAULT_BACKLOG_WARN_THRESHOLD,
        }
    }
}

/// Брокер Pub/Sub сообщений внутри процесса.
///
/// Поддерживает:
/// - отдельную FIFO-очередь и задачу доставки на каждую подписку
/// - `publish`, который никогда не ждёт обработчиков
/// - `close` с дожиданием уже поставленных сообщений в пределах таймаута
///
/// Клонирование дешёвое: клоны указывают на один и тот же брокер.
pub struct Broker<M> {
    inner: Arc<Inner<M>>,
}

pub(crate) struct Inner<M> {
    registry: Mutex<Registry<M>>,
    workers: TaskTracker,
    next_id: AtomicU64,
    config: BrokerConfig,
    counters: Arc<Counters>,
}

/// Канал → подписчики в порядке подписки. Канал без подписчиков в карте
/// отсутствует.
struct Registry<M> {
    subjects: HashMap<Arc<str>, Vec<Arc<Shared<M>>>>,
    closed: bool,
}

impl<M> Registry<M> {
    /// Переиспользует уже существующий ключ канала, чтобы все подписки на
    /// него делили одну аллокацию.
    fn intern(
        &self,
        subject: &str,
    ) -> Arc<str> {
        self.subjects
            .get_key_value(subject)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| Arc::from(subject))
    }

    fn len(&self) -> usize {
        self.subjects.values().map(Vec::len).sum()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Inherent methods
////////////////////////////////////////////////////////////////////////////////

impl<M> Inner<M> {
    /// Удаляет `target` из списка его канала; пустой канал удаляется целиком.
    /// Возвращает `false`, если подписка уже не зарегистрирована.
    pub(crate) fn remove(
        &self,
        target: &Arc<Shared<M>>,
    ) -> bool {
        let mut registry = self.registry.lock();
        let Some(list) = registry.subjects.get_mut(&*target.subject) else {
            return false;
        };
        let Some(pos) = list.iter().position(|s| Arc::ptr_eq(s, target)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            registry.subjects.remove(&*target.subject);
        }
        true
    }
}

impl<M: Clone + Send + 'static> Broker<M> {
    /// Создаёт брокер с [`BrokerConfig::default`].
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    subjects: HashMap::new(),
                    closed: false,
                }),
                workers: TaskTracker::new(),
                next_id: AtomicU64::new(0),
                config: BrokerConfig {
                    backlog_warn_threshold: config.backlog_warn_threshold.max(1),
                },
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Подписывает `handler` на `subject` и запускает задачу доставки.
    ///
    /// Обработчик получает каждое сообщение, опубликованное в `subject`
    /// с этого момента и до отписки. Вызывать внутри рантайма Tokio.
    ///
    /// # Errors
    /// - [`BrokerError::EmptySubject`], если `subject` пустой,
    /// - [`BrokerError::Closed`] после закрытия брокера.
    pub fn subscribe<H>(
        &self,
        subject: &str,
        handler: H,
    ) -> BrokerResult<Subscription<M>>
    where
        H: MessageHandler<M>,
    {
        if subject.is_empty() {
            return Err(BrokerError::EmptySubject);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let terminate = CancellationToken::new();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(BrokerError::Closed);
        }

        let subject = registry.intern(subject);
        let shared = Arc::new(Shared::new(
            id,
            subject.clone(),
            tx,
            backlog.clone(),
            terminate.clone(),
        ));
        registry
            .subjects
            .entry(subject.clone())
            .or_default()
            .push(shared.clone());

        // Запускаем под блокировкой, чтобы `close` всегда видел эту задачу.
        let worker = Worker::new(
            id,
            subject.clone(),
            rx,
            backlog,
            terminate,
            Arc::new(handler),
            self.inner.counters.clone(),
        );
        self.inner.workers.spawn(worker.run());
        drop(registry);

        debug!(subscription_id = id, subject = %subject, "Subscribed");
        Ok(Subscription::new(shared, Arc::downgrade(&self.inner)))
    }

    /// Публикация сообщения всем текущим подписчикам `subject`.
    ///
    /// Каждый подписчик получает свою копию в конец своей очереди; метод не
    /// ждёт ни обработчиков, ни места в очереди. Публикация в канал без
    /// подписчиков не ошибка: сообщение отбрасывается и учитывается в
    /// `unrouted`.
    ///
    /// # Errors
    /// [`BrokerError::Closed`] после закрытия брокера.
    pub fn publish(
        &self,
        subject: &str,
        message: M,
    ) -> BrokerResult<()> {
        let registry = self.inner.registry.lock();
        if registry.closed {
            return Err(BrokerError::Closed);
        }
        Counters::bump(&self.inner.counters.published);

        let Some((last, rest)) = registry
            .subjects
            .get(subject)
            .and_then(|subs| subs.split_last())
        else {
            Counters::bump(&self.inner.counters.unrouted);
            trace!(subject, "Publish without subscribers, message discarded");
            return Ok(());
        };

        for sub in rest {
            self.offer(sub, message.clone());
        }
        self.offer(last, message);
        Ok(())
    }

    fn offer(
        &self,
        sub: &Shared<M>,
        message: M,
    ) {
        match sub.offer(message) {
            Ok(depth) => {
                self.inner.counters.observe_backlog(depth);
                // Один раз на каждое пересечение порога снизу вверх.
                if depth == self.inner.config.backlog_warn_threshold {
                    warn!(
                        subscription_id = sub.id,
                        subject = %sub.subject,
                        backlog = depth,
                        "Subscriber backlog reached warning threshold"
                    );
                }
            }
            // Задача доставки завершается только после удаления подписки из
            // реестра, а `publish` держит блокировку реестра.
            Err(_) => debug!(
                subscription_id = sub.id,
                subject = %sub.subject,
                "Delivery worker gone, message not enqueued"
            ),
        }
    }

    /// Закрывает брокер, ожидая задачи доставки не дольше `timeout`.
    ///
    /// См. [`Broker::close_with_deadline`].
    pub async fn close(
        &self,
        timeout: Duration,
    ) -> BrokerResult<()> {
        self.close_with_deadline(Instant::now() + timeout).await
    }

    /// Закрывает брокер.
    ///
    /// Перестаёт принимать `subscribe` / `publish`, один раз сигналит каждой
    /// подписке и ждёт, пока все задачи доставки дообработают свои очереди
    /// или наступит `deadline`. Задачи, не успевшие к сроку, не отменяются и
    /// доработают в фоне.
    ///
    /// Повторный вызов после закрытия сразу возвращает `Ok(())`.
    ///
    /// # Errors
    /// [`BrokerError::ShutdownTimeout`], если срок истёк раньше.
    pub async fn close_with_deadline(
        &self,
        deadline: Instant,
    ) -> BrokerResult<()> {
        let started = Instant::now();
        let timeout = deadline.saturating_duration_since(started);

        let subjects = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return Ok(());
            }
            registry.closed = true;
            std::mem::take(&mut registry.subjects)
        };

        let mut signalled = 0usize;
        let mut queued = 0usize;
        for sub in subjects.values().flatten() {
            queued += sub.backlog();
            if sub.terminate() {
                signalled += 1;
            }
        }
        drop(subjects);
        self.inner.workers.close();
        info!(signalled, queued, ?timeout, "Closing broker");

        match tokio::time::timeout_at(deadline, self.inner.workers.wait()).await {
            Ok(()) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Broker closed, all delivery workers finished"
                );
                Ok(())
            }
            Err(_) => {
                let pending = self.inner.workers.len();
                warn!(
                    pending,
                    ?timeout,
                    "Broker close timed out, workers keep running in the background"
                );
                Err(BrokerError::ShutdownTimeout { timeout, pending })
            }
        }
    }

    /// `true` после вызова `close`.
    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }

    /// Количество активных подписок на `subject`.
    pub fn subscriber_count(
        &self,
        subject: &str,
    ) -> usize {
        self.inner
            .registry
            .lock()
            .subjects
            .get(subject)
            .map_or(0, Vec::len)
    }

    /// Каналы, у которых есть хотя бы один подписчик.
    pub fn subjects(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .subjects
            .keys()
            .map(|k| k.to_string())
            .collect()
    }

    /// Задачи доставки, которые ещё не завершились (включая дообрабатывающие).
    pub fn running_workers(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn stats(&self) -> BrokerStats {
        let active = self.inner.registry.lock().len();
        self.inner.counters.snapshot(active)
    }

    pub fn config(&self) -> BrokerConfig {
        self.inner.config
    }
}

impl<M: Clone + Send + 'static> Default for Broker<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Broker<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Broker<M> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("Broker")
            .field("subjects", &registry.subjects.len())
            .field("subscriptions", &registry.len())
            .field("closed", &registry.closed)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::sleep;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl MessageHandler<u32> {
        let counter = counter.clone();
        move |_: u32| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_registers_under_subject() {
        let broker = Broker::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = broker.subscribe("chan", counting(&count)).unwrap();
        let b = broker.subscribe("chan", counting(&count)).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(broker.subscriber_count("chan"), 2);
        assert_eq!(broker.subjects(), vec!["chan".to_string()]);
        assert_eq!(broker.stats().active_subscriptions, 2);
    }

    #[tokio::test]
    async fn test_empty_subject_is_rejected() {
        let broker = Broker::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let err = broker.subscribe("", counting(&count)).unwrap_err();
        assert_eq!(err, BrokerError::EmptySubject);
        assert_eq!(broker.running_workers(), 0);
    }

    /// The subject entry disappears with its last subscriber.
    #[tokio::test]
    async fn test_unsubscribe_removes_empty_subject() {
        let broker = Broker::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = broker.subscribe("temp", counting(&count)).unwrap();
        let b = broker.subscribe("temp", counting(&count)).unwrap();

        a.unsubscribe();
        assert_eq!(broker.subscriber_count("temp"), 1);
        b.unsubscribe();
        assert_eq!(broker.subscriber_count("temp"), 0);
        assert!(broker.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_interned_subject_is_shared() {
        let broker = Broker::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _a = broker.subscribe("shared", counting(&count)).unwrap();
        let _b = broker.subscribe("shared", counting(&count)).unwrap();

        let registry = broker.inner.registry.lock();
        let list = registry.subjects.get("shared").unwrap();
        assert!(Arc::ptr_eq(&list[0].subject, &list[1].subject));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_discarded() {
        let broker = Broker::<u32>::new();
        broker.publish("nochan", 1).unwrap();

        let stats = broker.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.unrouted, 1);
        assert!(broker.subjects().is_empty());
    }

    /// Всплеск больше порога не теряется: всё ставится в очередь и
    /// доставляется по порядку, когда обработчик освобождается.
    #[tokio::test]
    async fn test_burst_beyond_threshold_is_queued() {
        let broker = Broker::<u32>::with_config(BrokerConfig {
            backlog_warn_threshold: 4,
        });
        let release = CancellationToken::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (r, s) = (release.clone(), seen.clone());
        let sub = broker
            .subscribe("q", move |n: u32| {
                let (r, s) = (r.clone(), s.clone());
                async move {
                    r.cancelled().await;
                    s.lock().push(n);
                }
            })
            .unwrap();

        // Тест однопоточный: все 20 сообщений попадают в очередь раньше, чем
        // задача доставки получит управление.
        for n in 0..20 {
            broker.publish("q", n).unwrap();
        }
        assert_eq!(broker.stats().peak_backlog, 20);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(sub.backlog(), 19);

        release.cancel();
        broker.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(sub.backlog(), 0);
        assert_eq!(broker.stats().delivered, 20);
    }

    #[tokio::test]
    async fn test_zero_threshold_is_clamped() {
        let broker = Broker::<u32>::with_config(BrokerConfig {
            backlog_warn_threshold: 0,
        });
        assert_eq!(broker.config().backlog_warn_threshold, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_new_work() {
        let broker = Broker::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = broker.subscribe("x", counting(&count)).unwrap();

        broker.close(Duration::from_secs(1)).await.unwrap();
        assert!(broker.is_closed());
        assert!(!sub.is_active());
        assert_eq!(broker.running_workers(), 0);

        broker.close(Duration::ZERO).await.unwrap();
        assert_eq!(broker.publish("x", 1), Err(BrokerError::Closed));
        assert!(matches!(
            broker.subscribe("x", counting(&count)),
            Err(BrokerError::Closed)
        ));

        // Unsubscribing after close is a no-op.
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let broker = Broker::<u32>::new();
        let other = broker.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = other.subscribe("c", counting(&count)).unwrap();
        assert_eq!(broker.subscriber_count("c"), 1);
    }
}
