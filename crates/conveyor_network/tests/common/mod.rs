#![allow(dead_code)]

use std::time::Duration;

use conveyor_network::{ConveyorConfig, ConveyorEvent, Layout, LayoutSpec};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Upper bound for any single wait in these tests (virtual time).
pub const PATIENCE: Duration = Duration::from_secs(120);

pub async fn spawn(spec: &LayoutSpec) -> Layout {
    Layout::spawn(spec, ConveyorConfig::default())
        .await
        .expect("layout should start")
}

/// Wait for the first event matching `pred`, skipping the others.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<ConveyorEvent>, mut pred: F) -> ConveyorEvent
where
    F: FnMut(&ConveyorEvent) -> bool,
{
    tokio::time::timeout(PATIENCE, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Sample the pallet holders every 250 ms for `span` and fail if two
/// conveyors ever hold it. Samples fall between whole seconds, where no
/// protocol timer fires.
pub async fn assert_single_holder(layout: &Layout, span: Duration) {
    tokio::time::sleep(Duration::from_millis(125)).await;
    let deadline = tokio::time::Instant::now() + span;
    while tokio::time::Instant::now() < deadline {
        let holders = layout.holders();
        assert!(holders.len() <= 1, "pallet on several conveyors: {holders:?}");
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Everything already buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<ConveyorEvent>) -> Vec<ConveyorEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
