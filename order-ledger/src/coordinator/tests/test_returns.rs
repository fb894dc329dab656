use super::*;

/// Order "100": shipment 1 holds a (2 × 15.00) and c (1 × 8.00), shipment 2
/// holds b (1 × 5.00); both shipped
async fn shipped_order(coordinator: &Coordinator) -> (String, String) {
    open_order(coordinator, "100");
    let first = add_shipment_with(
        coordinator,
        "100",
        ShipmentKind::Physical,
        vec![line("a", 2, "15.00"), line("c", 1, "8.00")],
    )
    .await;
    let second =
        add_shipment_with(coordinator, "100", ShipmentKind::Physical, vec![line("b", 1, "5.00")]).await;
    checkout(coordinator, "100");
    ship(coordinator, "100", &first);
    ship(coordinator, "100", &second);
    (first, second)
}

/// Exchange order "200" with one 25.00 line (27.50 with tax)
async fn exchange_order(coordinator: &Coordinator) -> String {
    open_order(coordinator, "200");
    add_shipment_with(coordinator, "200", ShipmentKind::Physical, vec![line("x", 1, "25.00")]).await
}

#[tokio::test]
async fn test_return_tax_prorated_by_quantity() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;

    let totals = coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap();
    assert_eq!(totals.tax_total, usd("1.50"));
    assert_eq!(totals.subtotal, usd("15.00"));
    assert_eq!(totals.return_total, usd("16.50"));

    let order = coordinator.snapshot("100").unwrap();
    let request = order.return_request("RMA-1").unwrap();
    assert_eq!(request.status(), ReturnStatus::AwaitingStockReturn);
    assert_eq!(request.tax_values().len(), 1);
}

#[tokio::test]
async fn test_return_with_shipping_and_restock() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    let mut draft = return_draft("RMA-1", ReturnKind::Return, &[("c", 1)]);
    draft.shipping_cost = Some(usd("4.00"));
    draft.less_restock_amount = Some(usd("2.00"));

    let totals = coordinator.initiate_return("100", &first, draft).await.unwrap();
    // 8.00 + 4.00 + 0.80 + 0.40 - 2.00
    assert_eq!(totals.shipping_tax, usd("0.40"));
    assert_eq!(totals.before_tax_return_total, usd("12.00"));
    assert_eq!(totals.return_total, usd("11.20"));
}

#[tokio::test]
async fn test_return_spanning_shipments_rejected() {
    let (coordinator, tax) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    let calls = tax.calls();

    let err = coordinator
        .initiate_return(
            "100",
            &first,
            return_draft("RMA-1", ReturnKind::Return, &[("a", 1), ("b", 1)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReturnSpansShipments { .. }));
    assert_eq!(tax.calls(), calls);
    assert!(coordinator.snapshot("100").unwrap().returns().is_empty());
}

#[tokio::test]
async fn test_return_quantity_bounded_by_other_returns() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap();

    let err = coordinator
        .initiate_return("100", &first, return_draft("RMA-2", ReturnKind::Return, &[("a", 2)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::ReturnQuantityExceeded {
            requested: 2,
            remaining: 1,
            ..
        }
    ));
    assert_eq!(AppError::from(err).code, ErrorCode::ReturnQuantityExceeded);

    coordinator.cancel_return("100", "RMA-1").unwrap();
    coordinator
        .initiate_return("100", &first, return_draft("RMA-2", ReturnKind::Return, &[("a", 2)]))
        .await
        .unwrap();
    let order = coordinator.snapshot("100").unwrap();
    assert_eq!(
        order.shipment(&first).unwrap().item("a").unwrap().returnable_quantity(),
        0
    );
}

#[tokio::test]
async fn test_return_lifecycle_and_terminal_noops() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    let mut rx = coordinator.subscribe();
    coordinator
        .initiate_return(
            "100",
            &first,
            return_draft("RMA-1", ReturnKind::Return, &[("a", 2), ("c", 1)]),
        )
        .await
        .unwrap();

    assert_eq!(coordinator.receive_return("100", "RMA-1", "a", 2).unwrap(), None);
    let t = coordinator
        .receive_return("100", "RMA-1", "c", 1)
        .unwrap()
        .unwrap();
    assert_eq!(t.to, ReturnStatus::AwaitingCompletion);
    // Fully received returns cannot be cancelled any more
    assert!(coordinator.cancel_return("100", "RMA-1").is_err());

    coordinator.complete_return("100", "RMA-1").unwrap();
    assert_eq!(coordinator.update_return_status("100", "RMA-1").unwrap(), None);
    assert_eq!(coordinator.complete_return("100", "RMA-1").unwrap(), None);
    assert_eq!(coordinator.cancel_return("100", "RMA-1").unwrap(), None);
    assert!(matches!(
        coordinator.revise_return("100", "RMA-1", &[]),
        Err(LedgerError::ReturnClosed(_))
    ));

    let transitions: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e.payload {
            LedgerEventPayload::ReturnStatusChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![ReturnStatus::AwaitingCompletion, ReturnStatus::Completed]
    );
}

#[tokio::test]
async fn test_revise_return_reprorates_locally() {
    let (coordinator, tax) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap();
    let calls = tax.calls();

    let totals = coordinator
        .revise_return(
            "100",
            "RMA-1",
            &[ReturnLineInput {
                line_item_id: "a".into(),
                quantity: 2,
            }],
        )
        .unwrap();
    assert_eq!(totals.tax_total, usd("3.00"));
    assert_eq!(totals.return_total, usd("33.00"));
    assert_eq!(tax.calls(), calls);
}

#[tokio::test]
async fn test_refunds_against_return() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap();
    coordinator
        .record_payment(
            "100",
            payment("r1", "10.00", TransactionType::Credit, Some("RMA-1")),
        )
        .unwrap();

    assert_eq!(coordinator.refunded_total("100", "RMA-1").unwrap(), usd("10.00"));
    assert_eq!(coordinator.owed_to_customer("100", "RMA-1").unwrap(), usd("6.50"));
}

#[tokio::test]
async fn test_return_tax_failure_stores_nothing() {
    let (coordinator, tax) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    tax.fail_next(10);

    let err = coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(coordinator.snapshot("100").unwrap().returns().is_empty());
}

#[tokio::test]
async fn test_exchange_flow() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    let exchange_shipment = exchange_order(&coordinator).await;
    let totals = coordinator
        .initiate_return("100", &first, return_draft("RMA-X", ReturnKind::Exchange, &[("a", 1)]))
        .await
        .unwrap();
    assert_eq!(totals.return_total, usd("16.50"));

    let changes = coordinator.link_exchange("100", "RMA-X", "200").unwrap();
    assert_eq!(
        changes.order.map(|t| t.to),
        Some(OrderStatus::AwaitingExchange)
    );

    // The pending return covers most of the exchange order
    let summary = coordinator.payment_summary("200").unwrap();
    assert_eq!(summary.adjusted_total, usd("27.50"));
    assert_eq!(summary.due_to_rma, usd("16.50"));
    assert_eq!(summary.balance, usd("11.00"));

    let original = coordinator.snapshot("100").unwrap();
    let request = original.return_request("RMA-X").unwrap();
    assert_eq!(request.exchange_order_number(), Some("200"));
    assert_eq!(request.refund_total(), usd("-11.00"));

    coordinator.receive_return("100", "RMA-X", "a", 1).unwrap();
    assert_eq!(
        coordinator.snapshot("200").unwrap().exchange().map(|l| l.return_status),
        Some(ReturnStatus::AwaitingCompletion)
    );

    let changes = coordinator.complete_exchange("200").unwrap();
    assert_eq!(
        changes.order,
        Some(Transition {
            from: OrderStatus::AwaitingExchange,
            to: OrderStatus::InProgress
        })
    );
    assert_eq!(
        coordinator.effective_status("200", &exchange_shipment).unwrap(),
        ShipmentStatus::InventoryAssigned
    );
    assert_eq!(
        coordinator
            .snapshot("100")
            .unwrap()
            .return_request("RMA-X")
            .unwrap()
            .status(),
        ReturnStatus::Completed
    );
    let summary = coordinator.payment_summary("200").unwrap();
    assert!(summary.due_to_rma.is_zero());
    assert_eq!(summary.balance, usd("27.50"));
}

#[tokio::test]
async fn test_exchange_total_tracks_exchange_order() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    let exchange_shipment = exchange_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-X", ReturnKind::Exchange, &[("a", 1)]))
        .await
        .unwrap();
    coordinator.link_exchange("100", "RMA-X", "200").unwrap();

    coordinator
        .add_line_item("200", &exchange_shipment, line("y", 1, "10.00"))
        .await
        .unwrap();
    let original = coordinator.snapshot("100").unwrap();
    // 16.50 - 38.50
    assert_eq!(
        original.return_request("RMA-X").unwrap().refund_total(),
        usd("-22.00")
    );
}

#[tokio::test]
async fn test_cancel_exchange_return_cancels_exchange_order() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    exchange_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-X", ReturnKind::Exchange, &[("a", 1)]))
        .await
        .unwrap();
    coordinator.link_exchange("100", "RMA-X", "200").unwrap();

    coordinator.cancel_return("100", "RMA-X").unwrap();
    assert_eq!(
        coordinator.current_totals("200").unwrap().status,
        OrderStatus::Cancelled
    );
    assert!(matches!(
        coordinator.complete_exchange("200"),
        Err(LedgerError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_exchange_link_rules() {
    let (coordinator, _) = create_test_coordinator();
    let (first, _) = shipped_order(&coordinator).await;
    exchange_order(&coordinator).await;
    coordinator
        .initiate_return("100", &first, return_draft("RMA-1", ReturnKind::Return, &[("a", 1)]))
        .await
        .unwrap();

    assert!(coordinator.link_exchange("100", "RMA-1", "100").is_err());
    // A plain return cannot be settled by an exchange order
    assert!(matches!(
        coordinator.link_exchange("100", "RMA-1", "200"),
        Err(LedgerError::InvalidOperation(_))
    ));
    assert!(matches!(
        coordinator.complete_exchange("200"),
        Err(LedgerError::ExchangeNotLinked(_))
    ));
}
