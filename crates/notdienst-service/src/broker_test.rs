use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use super::*;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Connect,
    Subscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnect,
}

/// Accepts any number of connections and answers just enough of MQTT 3.1.1
/// for a client session to run.
struct FakeBroker {
    port: u16,
    seen: mpsc::UnboundedReceiver<Seen>,
    history: Vec<Seen>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
}

impl FakeBroker {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let (inject, inject_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let inject_rx = Arc::new(Mutex::new(inject_rx));

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (mut reader, writer) = stream.into_split();
                let writer = Arc::new(Mutex::new(writer));

                let forward_to = Arc::clone(&writer);
                let inject_rx = Arc::clone(&inject_rx);
                let forwarder = tokio::spawn(async move {
                    let mut inject_rx = inject_rx.lock().await;
                    while let Some(bytes) = inject_rx.recv().await {
                        if forward_to.lock().await.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                });

                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    while let Some((header, body)) = read_packet(&mut reader).await {
                        if let Some(reply) = respond(header, &body, &seen_tx) {
                            if writer.lock().await.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    forwarder.abort();
                });
            }
        });

        Self {
            port,
            seen,
            history: Vec::new(),
            inject,
        }
    }

    fn send_publish(&self, topic: &str, payload: &[u8]) {
        self.inject.send(publish_packet(topic, payload)).unwrap();
    }

    async fn wait_for(&mut self, wanted: impl Fn(&Seen) -> bool) -> Seen {
        loop {
            let seen = timeout(WAIT, self.seen.recv())
                .await
                .expect("broker saw nothing in time")
                .expect("broker stopped");
            self.history.push(seen.clone());
            if wanted(&seen) {
                return seen;
            }
        }
    }

    async fn publish_on(&mut self, wanted: &str) -> Value {
        let seen = self
            .wait_for(|seen| matches!(seen, Seen::Publish { topic, .. } if topic == wanted))
            .await;
        let Seen::Publish { payload, .. } = seen else {
            unreachable!()
        };
        serde_json::from_slice(&payload).expect("payload should be JSON")
    }
}

async fn read_packet(reader: &mut OwnedReadHalf) -> Option<(u8, Vec<u8>)> {
    let header = reader.read_u8().await.ok()?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await.ok()?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; remaining];
    reader.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn respond(header: u8, body: &[u8], seen: &mpsc::UnboundedSender<Seen>) -> Option<Vec<u8>> {
    match header >> 4 {
        1 => {
            seen.send(Seen::Connect).ok();
            Some(vec![0x20, 0x02, 0x00, 0x00])
        }
        3 => {
            let qos = (header >> 1) & 0x03;
            let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
            let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
            let mut offset = 2 + topic_len;
            let ack = (qos > 0).then(|| {
                let ack = vec![0x40, 0x02, body[offset], body[offset + 1]];
                offset += 2;
                ack
            });
            seen.send(Seen::Publish {
                topic,
                payload: body[offset..].to_vec(),
                retain: header & 0x01 == 0x01,
            })
            .ok();
            ack
        }
        8 => {
            let topic_len = usize::from(u16::from_be_bytes([body[2], body[3]]));
            let topic = String::from_utf8(body[4..4 + topic_len].to_vec()).unwrap();
            seen.send(Seen::Subscribe(topic)).ok();
            Some(vec![0x90, 0x03, body[0], body[1], 0x00])
        }
        12 => Some(vec![0xD0, 0x00]),
        14 => {
            seen.send(Seen::Disconnect).ok();
            None
        }
        _ => None,
    }
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    let mut len = 2 + topic.len() + payload.len();
    loop {
        let mut byte = u8::try_from(len % 128).unwrap();
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(&u16::try_from(topic.len()).unwrap().to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn session_config(port: u16, max_packet_size: usize) -> SessionConfig {
    SessionConfig {
        host: "127.0.0.1".to_string(),
        port,
        client_id: "notdienst-test".to_string(),
        username: None,
        password: None,
        keep_alive: Duration::from_secs(60),
        max_packet_size,
        topics: Topics::from_base("test/eps"),
    }
}

fn topics() -> Topics {
    Topics::from_base("test/eps")
}

/// A worker that consumes its queue without doing anything.
fn idle_worker(mut queue: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move { while queue.recv().await.is_some() {} })
}

fn shutdown_trigger() -> (oneshot::Sender<()>, impl Future<Output = ()>) {
    let (stop, stopped) = oneshot::channel::<()>();
    (stop, async move {
        stopped.await.ok();
    })
}

#[tokio::test]
async fn connect_announces_online_and_subscribes() {
    let mut broker = FakeBroker::start().await;
    let session = BrokerSession::connect(&session_config(broker.port, 256 * 1024))
        .await
        .unwrap();

    let (commands, queue) = mpsc::channel(4);
    let (stop, shutdown) = shutdown_trigger();
    let running = tokio::spawn(session.run(commands, idle_worker(queue), shutdown));

    broker
        .wait_for(|seen| *seen == Seen::Subscribe(topics().command))
        .await;
    assert!(broker.history.contains(&Seen::Publish {
        topic: topics().lwt,
        payload: b"online".to_vec(),
        retain: true,
    }));

    stop.send(()).unwrap();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    broker.wait_for(|seen| *seen == Seen::Disconnect).await;
    assert!(broker.history.contains(&Seen::Publish {
        topic: topics().lwt,
        payload: b"offline".to_vec(),
        retain: true,
    }));
}

#[tokio::test]
async fn shutdown_lets_the_command_in_flight_publish_first() {
    let mut broker = FakeBroker::start().await;
    let session = BrokerSession::connect(&session_config(broker.port, 256 * 1024))
        .await
        .unwrap();
    let publisher = session.publisher();

    let (commands, mut queue) = mpsc::channel(4);
    let (started_tx, started) = oneshot::channel();
    let (release, released) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let payload = queue.recv().await.expect("one command");
        started_tx.send(()).unwrap();
        released.await.unwrap();
        publisher
            .publish(&topics().data, payload, QoS::AtMostOnce)
            .await
            .unwrap();
        while queue.recv().await.is_some() {}
    });

    let (stop, shutdown) = shutdown_trigger();
    let running = tokio::spawn(session.run(commands, worker, shutdown));

    broker.send_publish(&topics().command, br#"{"command":"update"}"#);
    timeout(WAIT, started).await.unwrap().unwrap();
    stop.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished(), "session ended before the command finished");
    release.send(()).unwrap();

    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    broker.wait_for(|seen| *seen == Seen::Disconnect).await;

    let position = |wanted: &Seen| broker.history.iter().position(|seen| seen == wanted);
    let data = position(&Seen::Publish {
        topic: topics().data,
        payload: br#"{"command":"update"}"#.to_vec(),
        retain: false,
    })
    .expect("command result was never published");
    let offline = position(&Seen::Publish {
        topic: topics().lwt,
        payload: b"offline".to_vec(),
        retain: true,
    })
    .expect("offline status was never published");
    let disconnect = position(&Seen::Disconnect).unwrap();
    assert!(data < offline && offline < disconnect, "{:?}", broker.history);
}

#[tokio::test]
async fn oversized_outgoing_message_does_not_end_the_session() {
    let mut broker = FakeBroker::start().await;
    let session = BrokerSession::connect(&session_config(broker.port, 1024))
        .await
        .unwrap();
    session
        .publisher()
        .publish(&topics().data, vec![b'x'; 4096], QoS::AtMostOnce)
        .await
        .unwrap();

    let (commands, queue) = mpsc::channel(4);
    let (stop, shutdown) = shutdown_trigger();
    let running = tokio::spawn(session.run(commands, idle_worker(queue), shutdown));

    let report = broker.publish_on(&topics().error).await;
    assert_eq!(report["error"], OVERSIZED_PACKET_ERROR);
    assert!(!running.is_finished());

    stop.send(()).unwrap();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn oversized_incoming_command_is_discarded_and_session_resubscribes() {
    let mut broker = FakeBroker::start().await;
    let session = BrokerSession::connect(&session_config(broker.port, 1024))
        .await
        .unwrap();

    let (commands, mut queue) = mpsc::channel(4);
    let (received_tx, mut received) = mpsc::unbounded_channel();
    let worker = tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            received_tx.send(payload).ok();
        }
    });
    let (stop, shutdown) = shutdown_trigger();
    let running = tokio::spawn(session.run(commands, worker, shutdown));

    broker
        .wait_for(|seen| *seen == Seen::Subscribe(topics().command))
        .await;
    broker.send_publish(&topics().command, &vec![b' '; 4096]);

    let report = broker.publish_on(&topics().error).await;
    assert_eq!(report["error"], OVERSIZED_PACKET_ERROR);
    broker
        .wait_for(|seen| *seen == Seen::Subscribe(topics().command))
        .await;
    let connects = broker
        .history
        .iter()
        .filter(|seen| **seen == Seen::Connect)
        .count();
    assert_eq!(connects, 2);

    stop.send(()).unwrap();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    assert!(received.try_recv().is_err(), "oversized command reached the worker");
}

#[tokio::test]
async fn full_command_queue_is_reported() {
    let mut broker = FakeBroker::start().await;
    let session = BrokerSession::connect(&session_config(broker.port, 256 * 1024))
        .await
        .unwrap();

    let (commands, mut queue) = mpsc::channel(1);
    let (release, released) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        released.await.ok();
        while queue.recv().await.is_some() {}
    });
    let (stop, shutdown) = shutdown_trigger();
    let running = tokio::spawn(session.run(commands, worker, shutdown));

    broker.send_publish(&topics().command, br#"{"command":"update"}"#);
    broker.send_publish(&topics().command, br#"{"command":"update"}"#);

    let report = broker.publish_on(&topics().error).await;
    assert_eq!(report["error"], QUEUE_FULL_ERROR);
    assert_eq!(report["capacity"], 1);

    release.send(()).unwrap();
    stop.send(()).unwrap();
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
}

#[test]
fn packet_size_bound_covers_topic_and_headers() {
    assert_eq!(publish_packet_size("a/b", 10), 5 + 2 + 3 + 2 + 10);
}
