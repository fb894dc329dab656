use super::*;

fn two_priced_lines() -> Vec<LineItem> {
    vec![
        line("a", 2, "10.00"),
        line("b", 1, "5.00").with_discount(usd("1.00")),
    ]
}

#[test]
fn test_create_order_twice_rejected() {
    let (coordinator, _) = create_test_coordinator();
    coordinator.create_order("100", Currency::USD).unwrap();
    assert!(matches!(
        coordinator.create_order("100", Currency::USD),
        Err(LedgerError::OrderAlreadyExists(_))
    ));
}

#[test]
fn test_unknown_order_and_shipment() {
    let (coordinator, _) = create_test_coordinator();
    assert!(matches!(
        coordinator.current_totals("404"),
        Err(LedgerError::OrderNotFound(_))
    ));
    open_order(&coordinator, "100");
    assert!(matches!(
        coordinator.effective_status("100", "100-9"),
        Err(LedgerError::ShipmentNotFound(_))
    ));
}

#[test]
fn test_add_shipment_requires_persisted_order() {
    let (coordinator, _) = create_test_coordinator();
    coordinator.create_order("100", Currency::USD).unwrap();
    let err = coordinator
        .add_shipment("100", ShipmentKind::Physical)
        .unwrap_err();
    assert!(matches!(err, LedgerError::OrderNotPersisted(_)));
    assert_eq!(AppError::from(err).code, ErrorCode::OrderNotPersisted);

    coordinator.mark_persisted("100").unwrap();
    assert_eq!(
        coordinator.add_shipment("100", ShipmentKind::Physical).unwrap(),
        "100-1"
    );
}

#[tokio::test]
async fn test_exclusive_tax_shipment_totals() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment =
        add_shipment_with(&coordinator, "100", ShipmentKind::Electronic, two_priced_lines()).await;

    let totals = coordinator.recompute_shipment("100", &shipment).await.unwrap();
    assert_eq!(totals.subtotal, usd("24.00"));
    assert_eq!(totals.item_tax, usd("2.40"));
    assert_eq!(totals.total, usd("26.40"));

    let order = coordinator.current_totals("100").unwrap();
    assert_eq!(order.total, usd("26.40"));
    assert_eq!(order.total_tax, usd("2.40"));
}

#[tokio::test]
async fn test_inclusive_tax_not_added_again() {
    let (coordinator, _) = create_coordinator_with(
        ScriptedTax::flat("0.10").inclusive(),
        Config::with_overrides(1000, 3),
    );
    open_order(&coordinator, "100");
    let shipment =
        add_shipment_with(&coordinator, "100", ShipmentKind::Electronic, two_priced_lines()).await;
    let totals = coordinator
        .set_subtotal_discount("100", &shipment, usd("2.00"))
        .await
        .unwrap();
    // itemSubtotal − subtotalDiscount
    assert_eq!(totals.total, usd("22.00"));
    assert_eq!(totals.total_before_tax, usd("19.60"));
}

#[tokio::test]
async fn test_subtotal_matches_line_amounts() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment =
        add_shipment_with(&coordinator, "100", ShipmentKind::Physical, two_priced_lines()).await;
    coordinator
        .update_line_item(
            "100",
            &shipment,
            "a",
            LineItemUpdate {
                quantity: Some(3),
                unit_price: Some(usd("9.99")),
                discount: None,
            },
        )
        .await
        .unwrap();

    let order = coordinator.snapshot("100").unwrap();
    let shipment = order.shipment(&shipment).unwrap();
    let expected = Money::sum(Currency::USD, shipment.items().map(LineItem::line_amount));
    assert_eq!(shipment.totals().subtotal, expected);
    assert_eq!(expected, usd("33.97"));
}

#[tokio::test]
async fn test_order_total_includes_cancelled_shipments() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let first =
        add_shipment_with(&coordinator, "100", ShipmentKind::Physical, vec![line("a", 1, "10.00")]).await;
    let second =
        add_shipment_with(&coordinator, "100", ShipmentKind::Physical, vec![line("b", 1, "20.00")]).await;
    checkout(&coordinator, "100");
    coordinator.cancel_shipment("100", &second).unwrap();

    let totals = coordinator.recompute("100").await.unwrap();
    assert_eq!(totals.total, usd("33.00"));
    assert_eq!(totals.adjusted_total, usd("11.00"));
    let sum = Money::sum(Currency::USD, totals.shipments.iter().map(|s| s.totals.total));
    assert_eq!(totals.total, sum);
    assert_eq!(
        coordinator.effective_status("100", &first).unwrap(),
        ShipmentStatus::InventoryAssigned
    );
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    add_shipment_with(&coordinator, "100", ShipmentKind::Physical, two_priced_lines()).await;
    add_shipment_with(&coordinator, "100", ShipmentKind::Electronic, vec![line("c", 4, "2.50")]).await;

    let first = coordinator.recompute("100").await.unwrap();
    let second = coordinator.recompute("100").await.unwrap();
    assert_eq!(first.total, second.total);
    assert_eq!(first.status, second.status);
    for (a, b) in first.shipments.iter().zip(&second.shipments) {
        assert_eq!(a.totals, b.totals);
        assert_eq!(a.status, b.status);
    }
}

#[tokio::test]
async fn test_service_shipment_always_zero() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment =
        add_shipment_with(&coordinator, "100", ShipmentKind::Service, vec![line("svc", 1, "99.00")]).await;
    let totals = coordinator.recompute_shipment("100", &shipment).await.unwrap();
    assert!(totals.subtotal.is_zero());
    assert!(totals.item_tax.is_zero());
    assert!(totals.total.is_zero());
    assert!(coordinator.current_totals("100").unwrap().total.is_zero());
}

#[tokio::test]
async fn test_shipping_cost_taxed_on_physical_only() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let physical =
        add_shipment_with(&coordinator, "100", ShipmentKind::Physical, vec![line("a", 1, "10.00")]).await;
    let electronic =
        add_shipment_with(&coordinator, "100", ShipmentKind::Electronic, vec![line("b", 1, "10.00")]).await;

    let totals = coordinator
        .set_shipping_cost("100", &physical, usd("5.00"))
        .await
        .unwrap();
    assert_eq!(totals.shipping_tax, usd("0.50"));
    assert_eq!(totals.total, usd("16.50"));
    assert!(matches!(
        coordinator
            .set_shipping_cost("100", &electronic, usd("5.00"))
            .await,
        Err(LedgerError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_allocation_update_skips_tax_call() {
    let (coordinator, tax) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment = add_shipment_with(
        &coordinator,
        "100",
        ShipmentKind::Physical,
        vec![LineItem::new("a", "SKU-A", 2, usd("10.00"))],
    )
    .await;
    let calls = tax.calls();

    coordinator.set_allocated_quantity("100", &shipment, "a", 2).unwrap();
    let totals = coordinator
        .update_line_item("100", &shipment, "a", LineItemUpdate::default())
        .await
        .unwrap();
    assert_eq!(tax.calls(), calls);
    assert_eq!(totals.total, usd("22.00"));
}

#[tokio::test]
async fn test_remove_bundle_removes_children() {
    let (coordinator, _) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment = add_shipment_with(
        &coordinator,
        "100",
        ShipmentKind::Physical,
        vec![
            line("bundle", 1, "0.00"),
            line("part-1", 1, "4.00").with_parent("bundle"),
            line("part-2", 1, "6.00").with_parent("bundle"),
            line("other", 1, "1.00"),
        ],
    )
    .await;
    assert_eq!(
        coordinator.current_totals("100").unwrap().total,
        usd("12.10")
    );

    let mut removed = coordinator
        .remove_line_item("100", &shipment, "bundle")
        .await
        .unwrap();
    removed.sort();
    assert_eq!(removed, vec!["bundle", "part-1", "part-2"]);
    assert_eq!(coordinator.current_totals("100").unwrap().total, usd("1.10"));
}

#[tokio::test]
async fn test_events_follow_mutations() {
    let (coordinator, _) = create_test_coordinator();
    let mut rx = coordinator.subscribe();
    open_order(&coordinator, "100");
    add_shipment_with(&coordinator, "100", ShipmentKind::Physical, vec![line("a", 1, "10.00")]).await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        LedgerEventPayload::ShipmentRecomputed { tax_refreshed: true, .. }
    )));
    assert!(events.iter().any(|e| e.payload
        == LedgerEventPayload::OrderTotalChanged { total: usd("11.00") }));
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(events.iter().all(|e| e.order_number == "100"));
}

#[tokio::test]
async fn test_hydrated_order_waits_for_rearm() {
    let (coordinator, tax) = create_test_coordinator();
    open_order(&coordinator, "100");
    let shipment =
        add_shipment_with(&coordinator, "100", ShipmentKind::Physical, vec![line("a", 1, "10.00")]).await;
    let stored = serde_json::to_string(&coordinator.snapshot("100").unwrap()).unwrap();

    let (restored, restored_tax) = create_test_coordinator();
    restored
        .load_order(serde_json::from_str(&stored).unwrap())
        .unwrap();
    let totals = restored
        .update_line_item(
            "100",
            &shipment,
            "a",
            LineItemUpdate {
                quantity: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Recalculation is still off: persisted amounts stand
    assert_eq!(totals.total, usd("11.00"));
    assert_eq!(restored_tax.calls(), 0);

    let totals = restored.recalculate_after_update("100").await.unwrap();
    assert_eq!(totals.total, usd("22.00"));
    assert_eq!(restored_tax.calls(), 1);
    assert!(tax.calls() >= 1);
}
