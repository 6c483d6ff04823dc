use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use subpub_error::{ErrorExt, ProtocolError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::protocol::{Command, Event, Reply};
use crate::pubsub::{Broker, Subscription};

/// Конфигурация для обработки соединений
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Таймаут записи одного ответа
    pub write_timeout: Duration,
    /// Сколько событий буферизуется для соединения, прежде чем обработчики
    /// его подписок начнут ждать сокет
    pub outbound_capacity: usize,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            write_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
            read_buffer_size: 8192,
        }
    }
}

/// Обработчик отдельного соединения: выполняет команды клиента и отправляет
/// ему события по его подпискам. При отключении все подписки снимаются.
pub struct ConnectionHandler {
    connection_id: u64,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    broker: Broker<Event>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
}

enum Flow {
    Continue,
    Close,
}

impl ConnectionHandler {
    pub fn new(
        connection_id: u64,
        socket: TcpStream,
        addr: SocketAddr,
        broker: Broker<Event>,
        config: ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let reader = BufReader::with_capacity(config.read_buffer_size, read_half);

        Self {
            connection_id,
            reader,
            writer: write_half,
            addr,
            broker,
            config,
            shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let ConnectionHandler {
            connection_id,
            reader,
            mut writer,
            addr,
            broker,
            config,
            shutdown,
        } = self;

        let (outbound, mut events) = mpsc::channel::<Reply>(config.outbound_capacity.max(1));
        let mut subscriptions: HashMap<String, Subscription<Event>> = HashMap::new();
        let mut lines = reader.lines();

        let outcome = loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!(connection_id, %addr, "Received shutdown signal");
                    let notice = Reply::Error("server shutting down".into());
                    if let Err(e) = send(&mut writer, &notice, config.write_timeout).await {
                        debug!(connection_id, %addr, error = %e, "Failed to send shutdown notice");
                    }
                    break Ok(());
                }

                Some(event) = events.recv() => {
                    if let Err(e) = send(&mut writer, &event, config.write_timeout).await {
                        debug!(connection_id, %addr, error = %e, "Failed to push event");
                        break Ok(());
                    }
                }

                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        trace!(connection_id, %addr, command = line.trim(), "Received command");
                        let (reply, flow) = match Command::parse(&line) {
                            Ok(cmd) => execute(
                                connection_id,
                                addr,
                                &broker,
                                &mut subscriptions,
                                &outbound,
                                cmd,
                            ),
                            Err(e) => (Err(e), Flow::Continue),
                        };
                        let reply = reply.unwrap_or_else(|e| {
                            debug!(
                                connection_id,
                                %addr,
                                code = %e.status_code(),
                                error = e.log_message(),
                                "Command rejected"
                            );
                            Reply::Error(e.client_message())
                        });
                        if let Err(e) = send(&mut writer, &reply, config.write_timeout).await {
                            error!(connection_id, %addr, error = %e, "Failed to send reply");
                            break Ok(());
                        }
                        if let Flow::Close = flow {
                            info!(connection_id, %addr, "Client sent QUIT, closing");
                            break Ok(());
                        }
                    }
                    Ok(None) => {
                        debug!(connection_id, %addr, "Client closed connection");
                        break Ok(());
                    }
                    Err(e) if e.kind() == ErrorKind::InvalidData => {
                        warn!(connection_id, %addr, "Ignoring invalid UTF-8 from client");
                    }
                    Err(e) if is_recoverable_error(&e) => {
                        debug!(connection_id, %addr, error = %e, "Connection dropped");
                        break Ok(());
                    }
                    Err(e) => {
                        error!(connection_id, %addr, error = %e, "Fatal read error");
                        break Err(e.into());
                    }
                },
            }
        };

        for (key, sub) in subscriptions.drain() {
            sub.unsubscribe();
            info!(connection_id, subscription_id = sub.id(), %key, "Subscription closed");
        }
        graceful_close_writer(connection_id, writer).await;
        outcome
    }
}

fn execute(
    connection_id: u64,
    addr: SocketAddr,
    broker: &Broker<Event>,
    subscriptions: &mut HashMap<String, Subscription<Event>>,
    outbound: &mpsc::Sender<Reply>,
    cmd: Command,
) -> (Result<Reply, ProtocolError>, Flow) {
    let reply = match cmd {
        Command::Publish { key, data } => {
            debug!(connection_id, %addr, %key, %data, "Publish");
            broker
                .publish(&key, Event::new(key.as_str(), data))
                .map(|_| Reply::Ok)
                .map_err(|e| {
                    // Закрытый брокер ожидаем во время остановки сервера.
                    if e.is_closed() {
                        debug!(connection_id, %key, "Publish after broker close");
                    } else {
                        warn!(connection_id, %key, error = %e, "Publish failed");
                    }
                    ProtocolError::from(e)
                })
        }
        Command::Subscribe { key } => {
            if subscriptions.contains_key(&key) {
                Ok(Reply::Ok)
            } else {
                let tx = outbound.clone();
                let handler = move |event: Event| {
                    let tx = tx.clone();
                    async move {
                        // Соединение могло уже закрыться, тогда событие некому отдать.
                        let _ = tx.send(Reply::Message(event)).await;
                    }
                };
                broker
                    .subscribe(&key, handler)
                    .map(|sub| {
                        info!(
                            connection_id,
                            %addr,
                            subscription_id = sub.id(),
                            %key,
                            "New subscription"
                        );
                        subscriptions.insert(key, sub);
                        Reply::Ok
                    })
                    .map_err(ProtocolError::from)
            }
        }
        Command::Unsubscribe { key } => match subscriptions.remove(&key) {
            Some(sub) => {
                sub.unsubscribe();
                info!(connection_id, subscription_id = sub.id(), %key, "Subscription closed");
                Ok(Reply::Ok)
            }
            None => Err(ProtocolError::NotSubscribed(key)),
        },
        Command::Ping => Ok(Reply::Pong),
        Command::Quit => return (Ok(Reply::Ok), Flow::Close),
    };
    (reply, Flow::Continue)
}

/// Записать ответ с таймаутом.
async fn send(
    writer: &mut OwnedWriteHalf,
    reply: &Reply,
    write_timeout: Duration,
) -> Result<()> {
    timeout(write_timeout, writer.write_all(reply.encode().as_bytes()))
        .await
        .context("Write timeout")?
        .context("Failed to write reply")?;
    Ok(())
}

/// Ошибки, при которых клиент просто ушёл.
fn is_recoverable_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}

async fn graceful_close_writer(
    connection_id: u64,
    mut writer: OwnedWriteHalf,
) {
    if let Err(e) = writer.shutdown().await {
        if e.kind() != ErrorKind::NotConnected {
            debug!(connection_id, error = %e, "Error during shutdown");
        }
    }
    debug!(connection_id, "Connection closed");
}
