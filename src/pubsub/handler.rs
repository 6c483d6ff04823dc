use std::future::Future;

use async_trait::async_trait;

/// Callback invoked by a subscription's delivery worker, once per message.
///
/// Calls for one subscription are sequential and in publish order; calls for
/// different subscriptions run concurrently. A panic inside `handle` is caught
/// by the worker, logged, and does not stop delivery of later messages.
///
/// Any `Fn(M) -> impl Future<Output = ()>` closure is a handler:
///
/// ```rust
/// # async fn demo() -> Result<(), subpub::BrokerError> {
/// use subpub::Broker;
///
/// let broker = Broker::<String>::new();
/// let sub = broker.subscribe("news", |msg: String| async move {
///     println!("got {msg}");
/// })?;
/// broker.publish("news", "hello".to_string())?;
/// sub.unsubscribe();
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MessageHandler<M: Send + 'static>: Send + Sync + 'static {
    async fn handle(
        &self,
        message: M,
    );
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for F
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(
        &self,
        message: M,
    ) {
        (self)(message).await
    }
}
