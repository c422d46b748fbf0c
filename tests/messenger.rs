use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use elevator_fleet::network::loopback::{LoopbackNet, LoopbackSocket};
use elevator_fleet::network::message::{Message, MsgKind, Payload};
use elevator_fleet::network::messenger::Messenger;
use elevator_fleet::network::NetError;
use elevator_fleet::CarId;

const RETRY: Duration = Duration::from_millis(100);

fn addr(id: CarId) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 47_000 + id as u16))
}

/// Starts a messenger with its receiver on `net`, returns it with its inbound queue.
fn car(net: &LoopbackNet, id: CarId, max_attempts: Option<u32>) -> (Arc<Messenger<LoopbackSocket>>, mpsc::Receiver<Message>) {
    let peers: HashMap<CarId, SocketAddr> = [1, 2].into_iter().map(|id| (id, addr(id))).collect();
    let messenger = Arc::new(Messenger::new(id, net.bind(addr(id)), peers, RETRY, max_attempts));
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(messenger.clone().run_receiver(tx));
    (messenger, rx)
}

fn delegation() -> Payload {
    Payload::OrderDelegation { target: 2, hall: vec![[false, false], [false, true], [false, false], [false, false]] }
}

/// Drops the first `n` datagrams of `kind`, counting how many it saw.
fn drop_first(net: &LoopbackNet, kind: MsgKind, n: usize) -> Arc<AtomicUsize> {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    net.set_filter(move |_, _, buf| {
        let matches = Message::decode(buf).is_ok_and(|m| m.kind() == kind);
        matches && counter.fetch_add(1, Ordering::SeqCst) < n
    });
    seen
}

#[tokio::test(start_paused = true)]
async fn delegation_survives_two_lost_attempts() {
    let net = LoopbackNet::new();
    let (leader, _leader_rx) = car(&net, 1, Some(5));
    let (_follower, mut follower_rx) = car(&net, 2, Some(5));
    let seen = drop_first(&net, MsgKind::OrderDelegation, 2);

    let start = Instant::now();
    let delivery = leader.send_reliable(2, delegation(), &CancellationToken::new()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(delivery.attempts, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(elapsed <= RETRY * 3, "took {:?}", elapsed);
    assert_eq!(leader.pending_acks(), 0);

    let got = follower_rx.recv().await.unwrap();
    assert_eq!(got.sender_id, 1);
    assert_eq!(got.msg_id, delivery.msg_id);
    assert_eq!(got.payload, delegation());
}

#[tokio::test(start_paused = true)]
async fn lost_ack_means_the_receiver_sees_it_twice() {
    let net = LoopbackNet::new();
    let (leader, _leader_rx) = car(&net, 1, Some(5));
    let (_follower, mut follower_rx) = car(&net, 2, Some(5));
    drop_first(&net, MsgKind::Ack, 1);

    let delivery = leader.send_reliable(2, delegation(), &CancellationToken::new()).await.unwrap();
    assert_eq!(delivery.attempts, 2);

    // at-least-once: same message ID both times
    let first = follower_rx.recv().await.unwrap();
    let second = follower_rx.recv().await.unwrap();
    assert_eq!(first.msg_id, delivery.msg_id);
    assert_eq!(second.msg_id, delivery.msg_id);
    assert_eq!(leader.pending_acks(), 0);
}

#[tokio::test(start_paused = true)]
async fn partitioned_peer_is_given_up_on() {
    let net = LoopbackNet::new();
    let (leader, _leader_rx) = car(&net, 1, Some(4));
    let (_follower, _follower_rx) = car(&net, 2, Some(4));
    net.isolate(addr(2));

    let err = leader.send_reliable(2, delegation(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, NetError::NoAck { dest: 2, attempts: 4, .. }), "{}", err);
    assert_eq!(leader.pending_acks(), 0);

    // healed: the next send goes through first time
    net.heal(addr(2));
    let delivery = leader.send_reliable(2, delegation(), &CancellationToken::new()).await.unwrap();
    assert_eq!(delivery.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_send_stops_retransmitting() {
    let net = LoopbackNet::new();
    let (leader, _leader_rx) = car(&net, 1, None);
    let (_follower, _follower_rx) = car(&net, 2, None);
    let seen = drop_first(&net, MsgKind::OrderDelegation, usize::MAX);

    let cancel = CancellationToken::new();
    let send = {
        let leader = leader.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { leader.send_reliable(2, delegation(), &cancel).await })
    };
    tokio::time::sleep(RETRY * 5 + RETRY / 2).await;
    cancel.cancel();
    assert!(matches!(send.await.unwrap(), Err(NetError::Cancelled(_))));

    let sent = seen.load(Ordering::SeqCst);
    assert_eq!(sent, 6);
    tokio::time::sleep(RETRY * 10).await;
    assert_eq!(seen.load(Ordering::SeqCst), sent);
    assert_eq!(leader.pending_acks(), 0);
}
