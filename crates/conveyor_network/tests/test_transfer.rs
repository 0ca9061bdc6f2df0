mod common;

use std::time::Duration;

use conveyor_network::{
    ConveyorError, ConveyorEvent, ConveyorId, ConveyorStatus, Envelope, LayoutSpec, PathQuery,
    Performative,
};

fn ids(names: &[&str]) -> Vec<ConveyorId> {
    names.iter().map(|n| ConveyorId::from(*n)).collect()
}

fn chain() -> LayoutSpec {
    LayoutSpec::new()
        .with_conveyor("A", &["B"], 1)
        .with_conveyor("B", &["C"], 1)
        .with_conveyor("C", &[], 1)
}

/// A can reach C through B or through D.
fn diamond() -> LayoutSpec {
    LayoutSpec::new()
        .with_conveyor("A", &["B", "D"], 1)
        .with_conveyor("B", &["C"], 1)
        .with_conveyor("C", &[], 1)
        .with_conveyor("D", &["C"], 1)
}

fn rejection(result: Result<ConveyorId, ConveyorError>) -> String {
    match result {
        Err(ConveyorError::Rejected(reason)) => reason,
        other => panic!("Expected rejection, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_routed_transfer_along_chain() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();
    let mut b_events = layout.conveyor("B").unwrap().subscribe();

    client.load(&"A".into()).await.unwrap();
    client
        .routed_transfer(ids(&["A", "B", "C"]), false)
        .await
        .unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("C"));

    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HopStarted { next: "B".into() }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::StateChanged {
            status: ConveyorStatus::Idle,
            pallet_loaded: false,
        }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HandedOver { to: "B".into() }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::TransferFinished {
            reported_by: "C".into(),
        }
    })
    .await;

    // B held the pallet for one hop, then let go.
    common::next_event(&mut b_events, |e| {
        *e == ConveyorEvent::StateChanged {
            status: ConveyorStatus::Busy,
            pallet_loaded: true,
        }
    })
    .await;
    common::next_event(&mut b_events, |e| {
        *e == ConveyorEvent::HandedOver { to: "C".into() }
    })
    .await;

    assert_eq!(layout.holders(), ids(&["C"]));
    let c = client.info(&"C".into()).await.unwrap();
    assert_eq!(c.status, ConveyorStatus::Busy);
    assert!(c.pallet_loaded);
    assert_eq!(
        client.info(&"B".into()).await.unwrap().status,
        ConveyorStatus::Idle
    );

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transfer_discovers_route_first() {
    let spec = LayoutSpec::new()
        .with_conveyor("A", &["B", "D"], 1)
        .with_conveyor("B", &["E"], 1)
        .with_conveyor("E", &["C"], 1)
        .with_conveyor("D", &["C"], 1)
        .with_conveyor("C", &[], 1);
    let layout = common::spawn(&spec).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    client.load(&"A".into()).await.unwrap();
    client
        .transfer(&"A".into(), &"C".into(), true)
        .await
        .unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("C"));

    let found = common::next_event(&mut a_events, |e| {
        matches!(e, ConveyorEvent::PathFound { .. })
    })
    .await;
    assert!(matches!(
        found,
        ConveyorEvent::PathFound { ref route, .. } if *route == ids(&["A", "D", "C"])
    ));
    assert_eq!(layout.holders(), ids(&["C"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transfer_requires_pallet() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();

    client
        .routed_transfer(ids(&["A", "B", "C"]), false)
        .await
        .unwrap();
    let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
    assert_eq!(reason, "Cannot proceed, pallet not loaded");

    client
        .transfer(&"A".into(), &"C".into(), true)
        .await
        .unwrap();
    let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
    assert_eq!(reason, "Cannot proceed, pallet not loaded");

    assert!(layout.holders().is_empty());
    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_route_without_receiver_is_ignored() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();
    client.load(&"A".into()).await.unwrap();

    let request = conveyor_network::Request::RoutedTransfer(conveyor_network::RoutedTransfer {
        route: ids(&["B", "C"]),
        reroute: false,
        requester: None,
    });
    client
        .send(conveyor_network::Envelope::request(
            client.id().clone(),
            "A".into(),
            &request,
        ))
        .await
        .unwrap();

    assert!(matches!(
        client.recv(Duration::from_secs(5)).await,
        Err(ConveyorError::Timeout(_))
    ));
    assert_eq!(layout.holders(), ids(&["A"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_next_hop_must_be_neighbour() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    client.load(&"A".into()).await.unwrap();
    client
        .routed_transfer(ids(&["A", "C"]), true)
        .await
        .unwrap();

    let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
    assert_eq!(reason, "Next conveyor C is not a neighbour");

    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::RouteRejected { next: "C".into() }
    })
    .await;
    // No load offer was made: the pallet never left.
    assert!(
        !common::drain(&mut a_events)
            .iter()
            .any(|e| matches!(e, ConveyorEvent::HopRetry { .. }))
    );
    assert_eq!(layout.holders(), ids(&["A"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_blocked_hop_reroutes() {
    let layout = common::spawn(&diamond()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    client
        .set_status(&"B".into(), ConveyorStatus::Down)
        .await
        .unwrap();
    client.load(&"A".into()).await.unwrap();
    client
        .routed_transfer(ids(&["A", "B", "C"]), true)
        .await
        .unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("C"));

    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HopRetry {
            next: "B".into(),
            attempt: 1,
        }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HopRetry {
            next: "B".into(),
            attempt: 2,
        }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::RerouteRequested {
            blocked: "B".into(),
            destination: "C".into(),
        }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::PathFound {
            route: ids(&["A", "D", "C"]),
            replies: 1,
        }
    })
    .await;
    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HandedOver { to: "D".into() }
    })
    .await;

    assert_eq!(layout.holders(), ids(&["C"]));
    let b = client.info(&"B".into()).await.unwrap();
    assert_eq!(b.status, ConveyorStatus::Down);
    assert!(!b.pallet_loaded);

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_blocked_hop_without_reroute_stalls() {
    let layout = common::spawn(&diamond()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    client
        .set_status(&"B".into(), ConveyorStatus::Down)
        .await
        .unwrap();
    client.load(&"A".into()).await.unwrap();
    client
        .routed_transfer(ids(&["A", "B", "C"]), false)
        .await
        .unwrap();

    let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
    assert_eq!(reason, "Transfer stalled at A: B did not accept the pallet");

    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::TransferStalled { next: "B".into() }
    })
    .await;
    assert!(
        !common::drain(&mut a_events)
            .iter()
            .any(|e| matches!(e, ConveyorEvent::RerouteRequested { .. }))
    );

    // The pallet stays where it was.
    assert_eq!(layout.holders(), ids(&["A"]));
    let a = client.info(&"A".into()).await.unwrap();
    assert_eq!(a.status, ConveyorStatus::Busy);
    assert!(a.pallet_loaded);

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_hop_succeeds_on_retry() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    client
        .set_status(&"B".into(), ConveyorStatus::Busy)
        .await
        .unwrap();
    client.load(&"A".into()).await.unwrap();
    client
        .routed_transfer(ids(&["A", "B", "C"]), false)
        .await
        .unwrap();

    common::next_event(&mut a_events, |e| {
        matches!(e, ConveyorEvent::HopRetry { attempt: 1, .. })
    })
    .await;
    // B frees up during the backoff.
    client
        .set_status(&"B".into(), ConveyorStatus::Idle)
        .await
        .unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("C"));
    assert!(
        !common::drain(&mut a_events)
            .iter()
            .any(|e| matches!(e, ConveyorEvent::HopRetry { attempt: 2, .. }))
    );
    assert_eq!(layout.holders(), ids(&["C"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_conveyor_route_finishes_in_place() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();

    client.load(&"B".into()).await.unwrap();
    client.routed_transfer(ids(&["B"]), false).await.unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("B"));
    assert_eq!(layout.holders(), ids(&["B"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reference_plant_end_to_end() {
    let layout = common::spawn(&LayoutSpec::reference_plant()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut origin_events = layout.conveyor("CNV1").unwrap().subscribe();

    client.load(&"CNV1".into()).await.unwrap();
    client
        .transfer(&"CNV1".into(), &"CNV9".into(), true)
        .await
        .unwrap();

    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("CNV9"));

    common::next_event(&mut origin_events, |e| {
        *e == ConveyorEvent::PathFound {
            route: ids(&["CNV1", "CNV2", "CNV3", "CNV13", "CNV9"]),
            replies: 2,
        }
    })
    .await;
    assert_eq!(layout.holders(), ids(&["CNV9"]));

    layout.shutdown().await;
}

/// A can hand the pallet to either B or C.
fn fork() -> LayoutSpec {
    LayoutSpec::new()
        .with_conveyor("A", &["B", "C"], 1)
        .with_conveyor("B", &[], 1)
        .with_conveyor("C", &[], 1)
}

#[tokio::test(start_paused = true)]
async fn test_second_route_during_hop_is_refused() {
    let layout = common::spawn(&fork()).await;
    let mut client = layout.client("ops").await.unwrap();

    let ((), ()) = tokio::join!(
        async {
            client.load(&"A".into()).await.unwrap();
            client.routed_transfer(ids(&["A", "B"]), false).await.unwrap();
            client.routed_transfer(ids(&["A", "C"]), false).await.unwrap();

            let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
            assert_eq!(reason, "Cannot proceed, a hop is already in progress");
            let reported_by = client
                .wait_for_transfer_finished(common::PATIENCE)
                .await
                .unwrap();
            assert_eq!(reported_by, ConveyorId::from("B"));
        },
        common::assert_single_holder(&layout, Duration::from_secs(10)),
    );

    assert_eq!(layout.holders(), ids(&["B"]));
    assert!(!client.info(&"C".into()).await.unwrap().pallet_loaded);

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transfer_during_hop_is_refused() {
    let layout = common::spawn(&fork()).await;
    let mut client = layout.client("ops").await.unwrap();

    client.load(&"A".into()).await.unwrap();
    client.routed_transfer(ids(&["A", "B"]), false).await.unwrap();
    client.transfer(&"A".into(), &"C".into(), false).await.unwrap();

    let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
    assert_eq!(reason, "Cannot proceed, a hop is already in progress");
    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("B"));
    assert_eq!(layout.holders(), ids(&["B"]));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unload_during_hop_drops_the_hop() {
    let layout = common::spawn(&chain()).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    let ((), ()) = tokio::join!(
        async {
            client.load(&"A".into()).await.unwrap();
            client.routed_transfer(ids(&["A", "B"]), false).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(client.unload(&"A".into()).await.unwrap(), "Pallet unloaded");

            let reason = rejection(client.wait_for_transfer_finished(common::PATIENCE).await);
            assert_eq!(reason, "Cannot proceed, pallet not loaded");
        },
        common::assert_single_holder(&layout, Duration::from_secs(10)),
    );

    common::next_event(&mut a_events, |e| {
        *e == ConveyorEvent::HopAbandoned { next: "B".into() }
    })
    .await;
    assert!(
        !common::drain(&mut a_events)
            .iter()
            .any(|e| matches!(e, ConveyorEvent::HandedOver { .. }))
    );
    assert!(layout.holders().is_empty());
    let a = client.info(&"A".into()).await.unwrap();
    assert_eq!(a.status, ConveyorStatus::Idle);

    // The belt is free again for the next pallet.
    client.load(&"A".into()).await.unwrap();
    client.routed_transfer(ids(&["A", "B"]), false).await.unwrap();
    let reported_by = client
        .wait_for_transfer_finished(common::PATIENCE)
        .await
        .unwrap();
    assert_eq!(reported_by, ConveyorId::from("B"));

    layout.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_agreement_after_stall_is_revoked() {
    let spec = LayoutSpec::new()
        .with_conveyor("A", &["B"], 1)
        .with_conveyor("B", &[], 1);
    let layout = common::spawn(&spec).await;
    let mut client = layout.client("ops").await.unwrap();
    let mut a_events = layout.conveyor("A").unwrap().subscribe();

    // Twenty one-second discoveries keep B from reading A's load offers
    // until well after A runs out of retries.
    for _ in 0..20 {
        let query = PathQuery::new("B".into(), "A".into(), false);
        client
            .send(Envelope::new(
                client.id().clone(),
                "B".into(),
                Performative::Cfp,
                query.to_value(),
            ))
            .await
            .unwrap();
    }
    client.load(&"A".into()).await.unwrap();
    client.routed_transfer(ids(&["A", "B"]), false).await.unwrap();

    let ((), ()) = tokio::join!(
        async {
            common::next_event(&mut a_events, |e| {
                *e == ConveyorEvent::TransferStalled { next: "B".into() }
            })
            .await;
            common::next_event(&mut a_events, |e| {
                *e == ConveyorEvent::LateAgreementRevoked { from: "B".into() }
            })
            .await;
        },
        common::assert_single_holder(&layout, Duration::from_secs(30)),
    );

    assert_eq!(layout.holders(), ids(&["A"]));
    let b = client.info(&"B".into()).await.unwrap();
    assert!(!b.pallet_loaded);
    assert_eq!(b.status, ConveyorStatus::Idle);

    layout.shutdown().await;
}
