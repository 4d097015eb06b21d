use super::*;
use crate::data_link::InfoKind;
use crate::physical::loopback::LoopbackSimulator;
use crate::physical::{AdapterDescriptor, TransportConfig};
use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

const SHORT: Duration = Duration::from_millis(10);

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn simulator() -> (Arc<LoopbackSimulator>, OpenHandle) {
    let bus = Arc::new(LoopbackSimulator::new(&["sim0"], 1));
    let handle = bus.open(0, 0, &TransportConfig::default()).unwrap();
    (bus, handle)
}

fn collector() -> (
    Arc<Mutex<Vec<ReceivedEvent>>>,
    impl FnMut(ReceivedEvent) + Send + 'static,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |event| sink.lock().unwrap().push(event))
}

/// Transport replaying a fixed script of poll results
struct Scripted {
    polls: Mutex<VecDeque<Result<Option<ReceivedEvent>>>>,
}

impl Transport for Scripted {
    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        Ok(Vec::new())
    }

    fn open(&self, _: usize, _: u8, _: &TransportConfig) -> Result<OpenHandle> {
        Ok(OpenHandle::new(0))
    }

    fn send(&self, _: &OpenHandle, _: &Frame) -> Result<()> {
        Ok(())
    }

    fn receive(&self, _: &OpenHandle) -> Result<Option<ReceivedEvent>> {
        self.polls.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    fn close(&self, _: &OpenHandle) -> Result<()> {
        Ok(())
    }
}

#[test]
fn forwards_events_in_order() {
    let (bus, handle) = simulator();
    let frames: Vec<Frame> = (0..5)
        .map(|i| Frame::data_frame(0x100 + i, false, &[i as u8]).unwrap())
        .collect();
    for frame in &frames {
        bus.send(&handle, frame).unwrap();
    }

    let rx_loop = ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT);
    let (events, sink) = collector();
    rx_loop.start(handle, sink).unwrap();
    assert_eq!(rx_loop.state(), LoopState::Running);

    assert!(wait_until(Duration::from_secs(2), || events.lock().unwrap().len() == 6));
    rx_loop.stop();
    assert_eq!(rx_loop.state(), LoopState::Idle);

    let events = events.lock().unwrap();
    assert_eq!(events[0], ReceivedEvent::InfoEvent(InfoKind::Started));
    let ids: Vec<u32> = events[1..].iter().map(|e| e.frame().unwrap().id()).collect();
    assert_eq!(ids, vec![0x100, 0x101, 0x102, 0x103, 0x104]);
}

#[test]
fn frames_sent_while_running_are_delivered() {
    let (bus, handle) = simulator();
    let rx_loop = ReceiveLoop::new(Arc::clone(&bus));
    let queue = rx_loop.start_queue(handle).unwrap();

    assert_eq!(
        queue.recv_timeout(Duration::from_secs(2)),
        Ok(ReceivedEvent::InfoEvent(InfoKind::Started))
    );

    let frame = Frame::data_frame(0x7E0, false, &[0x02, 0x10, 0x01]).unwrap();
    bus.send(&handle, &frame).unwrap();
    let echoed = queue.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(echoed.frame().unwrap().data(), frame.data());

    rx_loop.stop();
}

#[test]
fn second_start_fails() {
    let (bus, handle) = simulator();
    let rx_loop = ReceiveLoop::with_poll_interval(bus, SHORT);
    rx_loop.start(handle, |_| {}).unwrap();
    assert_eq!(rx_loop.start(handle, |_| {}), Err(CanError::AlreadyRunning));
    rx_loop.stop();
}

#[test]
fn concurrent_starts_admit_one_poller() {
    let (bus, handle) = simulator();
    let rx_loop = Arc::new(ReceiveLoop::with_poll_interval(bus, SHORT));
    let started = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let rx_loop = Arc::clone(&rx_loop);
            let started = Arc::clone(&started);
            thread::spawn(move || match rx_loop.start(handle, |_| {}) {
                Ok(()) => {
                    started.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => assert_eq!(e, CanError::AlreadyRunning),
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(started.load(Ordering::SeqCst), 1);
    rx_loop.stop();
}

#[test]
fn stop_when_idle_is_a_no_op() {
    let (bus, _) = simulator();
    let rx_loop = ReceiveLoop::new(bus);
    rx_loop.stop();
    rx_loop.stop();
    assert_eq!(rx_loop.state(), LoopState::Idle);
}

#[test]
fn no_events_after_stop_returns() {
    let (bus, handle) = simulator();
    let rx_loop = ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    rx_loop
        .start(handle, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    for i in 0..3u8 {
        let frame = Frame::data_frame(0x200, false, &[i]).unwrap();
        bus.send(&handle, &frame).unwrap();
    }
    rx_loop.stop();

    let at_stop = count.load(Ordering::SeqCst);
    assert!(at_stop <= 4);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), at_stop);
    assert_eq!(rx_loop.state(), LoopState::Idle);
}

#[test]
fn restarts_after_stop() {
    let (bus, handle) = simulator();
    let rx_loop = ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT);
    rx_loop.start(handle, |_| {}).unwrap();
    rx_loop.stop();

    let queue = rx_loop.start_queue(handle).unwrap();
    let frame = Frame::data_frame(0x55, false, &[]).unwrap();
    bus.send(&handle, &frame).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(queue.try_recv(), Ok(ReceivedEvent::DataFrame(_)))
    }));
    rx_loop.stop();
}

#[test]
fn failed_poll_is_forwarded_and_loop_continues() {
    let transport = Arc::new(Scripted {
        polls: Mutex::new(VecDeque::from(vec![
            Err(CanError::WriteFailed("controller fault".into())),
            Ok(Some(ReceivedEvent::InfoEvent(InfoKind::Reset))),
        ])),
    });
    let rx_loop = ReceiveLoop::with_poll_interval(transport, SHORT);
    let (events, sink) = collector();
    rx_loop.start(OpenHandle::new(0), sink).unwrap();

    assert!(wait_until(Duration::from_secs(2), || events.lock().unwrap().len() == 2));
    rx_loop.stop();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ReceivedEvent::ErrorEvent(ErrorKind::OtherError),
            ReceivedEvent::InfoEvent(InfoKind::Reset),
        ]
    );
}

#[test]
fn closed_handle_keeps_loop_alive() {
    let (bus, handle) = simulator();
    bus.close(&handle).unwrap();

    let rx_loop = ReceiveLoop::with_poll_interval(bus, SHORT);
    let (events, sink) = collector();
    rx_loop.start(handle, sink).unwrap();
    thread::sleep(Duration::from_millis(40));

    assert!(rx_loop.is_running());
    rx_loop.stop();
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn stop_from_callback() {
    let (bus, handle) = simulator();
    let rx_loop = Arc::new(ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT));
    let inner = Arc::clone(&rx_loop);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);

    for _ in 0..3 {
        let frame = Frame::data_frame(0x10, false, &[]).unwrap();
        bus.send(&handle, &frame).unwrap();
    }
    rx_loop
        .start(handle, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.stop();
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || rx_loop.state() == LoopState::Idle));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn restart_from_callback_waits_for_the_worker() {
    let (bus, handle) = simulator();
    let rx_loop = Arc::new(ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT));
    let inner = Arc::clone(&rx_loop);
    let restarts = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::clone(&restarts);

    rx_loop
        .start(handle, move |_| {
            inner.stop();
            results.lock().unwrap().push((inner.start(handle, |_| {}), inner.state()));
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || rx_loop.state() == LoopState::Idle));
    assert_eq!(
        *restarts.lock().unwrap(),
        vec![(Err(CanError::AlreadyRunning), LoopState::Stopping)]
    );

    // The first worker is gone, so a fresh start is admitted
    rx_loop.start(handle, |_| {}).unwrap();
    assert_eq!(rx_loop.state(), LoopState::Running);
    rx_loop.stop();
    assert_eq!(rx_loop.state(), LoopState::Idle);
}

#[test]
fn stop_from_another_thread_waits_for_a_callback_stop() {
    let (bus, handle) = simulator();
    let rx_loop = Arc::new(ReceiveLoop::with_poll_interval(Arc::clone(&bus), SHORT));
    let inner = Arc::clone(&rx_loop);
    let (entered_tx, entered_rx) = mpsc::channel();

    rx_loop
        .start(handle, move |_| {
            inner.stop();
            let _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(50));
        })
        .unwrap();

    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(rx_loop.state(), LoopState::Stopping);
    rx_loop.stop();
    assert_eq!(rx_loop.state(), LoopState::Idle);
}
