//! Integration tests for the full stock pipeline.
//!
//! Tests: Workflow → Document stream → Reconciliation Engine → Quantity Store + Ledger
//!
//! Verifies:
//! - Document transitions move stock exactly once
//! - Store quantities always equal ledger sums
//! - Contended pairs serialize; disjoint pairs do not block each other

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, mpsc};
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use stockledger_core::{ItemVariantId, LinePricing, LocationId, UserId};
    use stockledger_events::StockAlert;
    use stockledger_inventory::{
        DocumentRef, IdempotencyKey, MovementBatch, MovementKind, MovementRequest,
        ReconciliationError, StockKey,
    };
    use stockledger_purchasing::ReceivedLine;
    use stockledger_sales::{SaleId, SaleStatus};

    use crate::config::LedgerConfig;
    use crate::stock_store::StockStore;
    use crate::workflows::InMemoryWorkflows;
    use crate::workflows::adjustments::ManualMovement;

    fn setup() -> InMemoryWorkflows {
        stockledger_observability::init_for_tests();
        InMemoryWorkflows::in_memory(LedgerConfig::default())
    }

    fn opening(workflows: &InMemoryWorkflows, key: StockKey, quantity: u64) {
        workflows
            .adjustments()
            .record(
                format!("opening-{key}"),
                ManualMovement::new(key, MovementKind::InitialStock, quantity, "opening balance"),
                UserId::new(),
            )
            .unwrap();
    }

    fn sale_of(workflows: &InMemoryWorkflows, key: StockKey, quantity: u64) -> SaleId {
        let sale_id = workflows
            .open_sale(key.location_id, UserId::new())
            .unwrap()
            .document
            .id_typed();
        workflows
            .add_sale_line(
                sale_id,
                key.item_variant_id,
                quantity,
                LinePricing::new(dec!(9.90), dec!(10), dec!(20)),
            )
            .unwrap();
        sale_id
    }

    fn assert_consistent(workflows: &InMemoryWorkflows) {
        let drift = workflows.engine().verify_consistency().unwrap();
        assert!(drift.is_empty(), "store drifted from ledger: {drift:?}");
    }

    #[test]
    fn sale_cancellation_round_trip() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 50);
        let ledger_before = workflows.engine().ledger_len().unwrap();

        let sale_id = sale_of(&workflows, key, 5);
        workflows.checkout(sale_id, UserId::new()).unwrap();
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 45);

        workflows
            .cancel_sale(sale_id, UserId::new(), "wrong item")
            .unwrap();
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 50);

        let history = workflows.engine().list_by_item_location(key, 10).unwrap();
        let sale_rows: Vec<(MovementKind, i64)> = history
            .iter()
            .filter(|m| m.document == DocumentRef::Sale(sale_id.0))
            .map(|m| (m.kind, m.signed_quantity))
            .collect();
        // Newest first.
        assert_eq!(
            sale_rows,
            vec![(MovementKind::Return, 5), (MovementKind::Outbound, -5)]
        );
        assert_eq!(workflows.engine().ledger_len().unwrap(), ledger_before + 2);
        assert_consistent(&workflows);
    }

    #[test]
    fn purchase_partial_receipt_then_rejected_re_receipt() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        let user = UserId::new();
        let purchase_id = workflows
            .create_purchase(key.location_id, None, user)
            .unwrap()
            .document
            .id_typed();
        workflows
            .add_purchase_line(
                purchase_id,
                key.item_variant_id,
                100,
                LinePricing::new(dec!(1.25), dec!(0), dec!(0)),
            )
            .unwrap();

        let received = vec![ReceivedLine {
            line_no: 1,
            quantity: 60,
        }];
        workflows
            .receive_purchase(purchase_id, received.clone(), user)
            .unwrap();
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 60);

        let err = workflows
            .receive_purchase(purchase_id, received, user)
            .unwrap_err();
        assert!(matches!(
            err.reconciliation(),
            Some(ReconciliationError::DocumentReferenceConflict(_))
        ));
        assert_eq!(workflows.engine().ledger_len().unwrap(), 1);
        assert_consistent(&workflows);
    }

    #[test]
    fn count_finalize_appends_one_adjustment() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 30);
        let user = UserId::new();

        let count_id = workflows
            .open_count(key.location_id, None, user)
            .unwrap()
            .document
            .id_typed();
        workflows
            .record_counted_quantity(count_id, key.item_variant_id, 27, None, user)
            .unwrap();
        workflows.finalize_count(count_id, user).unwrap();

        let movements = workflows
            .engine()
            .list_by_document(DocumentRef::Count(count_id.0))
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].signed_quantity, -3);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 27);
        assert_consistent(&workflows);
    }

    #[test]
    fn transfer_shrinkage_stays_visible() {
        let workflows = setup();
        let item = ItemVariantId::new();
        let (source, destination) = (LocationId::new(), LocationId::new());
        opening(&workflows, StockKey::new(item, source), 10);
        let user = UserId::new();

        let transfer_id = workflows
            .create_transfer(source, destination, user)
            .unwrap()
            .document
            .id_typed();
        workflows.add_transfer_line(transfer_id, item, 10).unwrap();
        workflows.validate_transfer(transfer_id, user).unwrap();
        workflows
            .receive_transfer(
                transfer_id,
                vec![stockledger_transfers::ReceivedLine {
                    line_no: 1,
                    quantity: 8,
                }],
                user,
            )
            .unwrap();

        let engine = workflows.engine();
        assert_eq!(engine.get_quantity(StockKey::new(item, source)).unwrap(), 0);
        assert_eq!(engine.get_quantity(StockKey::new(item, destination)).unwrap(), 8);
        let net: i64 = engine
            .list_by_document(DocumentRef::Transfer(transfer_id.0))
            .unwrap()
            .iter()
            .map(|m| m.signed_quantity)
            .sum();
        assert_eq!(net, -2);
        assert_consistent(&workflows);
    }

    #[test]
    fn atomic_batch_rejects_every_line() {
        let workflows = setup();
        let location = LocationId::new();
        let plenty = StockKey::new(ItemVariantId::new(), location);
        let scarce = StockKey::new(ItemVariantId::new(), location);
        opening(&workflows, plenty, 10);
        opening(&workflows, scarce, 1);
        let ledger_before = workflows.engine().ledger_len().unwrap();

        let sale_id = sale_of(&workflows, plenty, 4);
        workflows
            .add_sale_line(
                sale_id,
                scarce.item_variant_id,
                2,
                LinePricing::new(dec!(3), dec!(0), dec!(0)),
            )
            .unwrap();

        let err = workflows.checkout(sale_id, UserId::new()).unwrap_err();
        assert!(matches!(
            err.reconciliation(),
            Some(ReconciliationError::InsufficientStock { .. })
        ));
        assert_eq!(workflows.engine().get_quantity(plenty).unwrap(), 10);
        assert_eq!(workflows.engine().get_quantity(scarce).unwrap(), 1);
        assert_eq!(workflows.engine().ledger_len().unwrap(), ledger_before);
        assert_eq!(
            workflows.sale(sale_id).unwrap().unwrap().status(),
            SaleStatus::Open
        );
    }

    #[test]
    fn depleting_checkout_raises_an_alert() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 5);
        workflows.engine().policies().set_threshold(key, 3);
        let alerts = workflows.engine().subscribe_alerts();

        let first = sale_of(&workflows, key, 3);
        workflows.checkout(first, UserId::new()).unwrap();
        let second = sale_of(&workflows, key, 2);
        workflows.checkout(second, UserId::new()).unwrap();

        let raised = alerts.drain();
        assert_eq!(raised.len(), 2);
        assert!(matches!(&raised[0], StockAlert::BelowThreshold(a) if a.current_quantity == 2));
        assert!(matches!(&raised[1], StockAlert::Depleted(a) if a.location_id == key.location_id));
    }

    #[test]
    fn document_events_are_published_after_append() {
        let workflows = setup();
        let documents = workflows.subscribe_documents();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 2);

        let sale_id = sale_of(&workflows, key, 1);
        workflows.checkout(sale_id, UserId::new()).unwrap();

        let published = documents.drain();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|e| e.aggregate_id() == sale_id.0));
        let versions: Vec<u64> = published.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn concurrent_sales_on_one_pair_never_oversell() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 10);

        let sales: Vec<SaleId> = (0..8).map(|_| sale_of(&workflows, key, 2)).collect();
        let barrier = Barrier::new(sales.len());

        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = sales
                .iter()
                .map(|sale_id| {
                    let workflows = &workflows;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        workflows.checkout(*sale_id, UserId::new()).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let sold = outcomes.iter().filter(|ok| **ok).count();
        assert_eq!(sold, 5);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 0);
        assert_consistent(&workflows);
    }

    #[test]
    fn concurrent_checkout_of_one_sale_applies_once() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 10);
        let sale_id = sale_of(&workflows, key, 3);
        let barrier = Barrier::new(4);

        let succeeded = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let workflows = &workflows;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        workflows.checkout(sale_id, UserId::new()).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(succeeded, 1);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 7);
        assert_eq!(
            workflows
                .engine()
                .list_by_document(DocumentRef::Sale(sale_id.0))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn disjoint_pairs_proceed_while_one_is_contended() {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig {
            lock_timeout_ms: 5_000,
            ..LedgerConfig::default()
        });
        let location = LocationId::new();
        let keys: Vec<StockKey> = (0..6)
            .map(|_| StockKey::new(ItemVariantId::new(), location))
            .collect();
        let barrier = Barrier::new(keys.len() * 2);

        std::thread::scope(|scope| {
            for (i, key) in keys.iter().enumerate() {
                for round in 0..2 {
                    let engine = workflows.engine();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        let batch = MovementBatch::new(
                            IdempotencyKey::new(DocumentRef::Manual, format!("load-{i}-{round}")),
                            vec![MovementRequest::movement(
                                key.item_variant_id,
                                key.location_id,
                                MovementKind::InitialStock,
                                5,
                                DocumentRef::Manual,
                                UserId::new(),
                            )],
                        );
                        engine.apply_batch(&batch).unwrap();
                    });
                }
            }
        });

        for key in &keys {
            assert_eq!(workflows.engine().get_quantity(*key).unwrap(), 10);
        }
        assert_eq!(workflows.engine().ledger_len().unwrap(), 12);
        assert_consistent(&workflows);
    }

    #[test]
    fn rebuild_restores_store_after_drift_check() {
        let workflows = setup();
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 7);
        let sale_id = sale_of(&workflows, key, 2);
        workflows.checkout(sale_id, UserId::new()).unwrap();

        assert_consistent(&workflows);
        assert_eq!(workflows.engine().rebuild_from_ledger().unwrap(), 0);
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 5);
    }

    #[test]
    fn retried_lock_timeout_leaves_the_sale_open() {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig {
            lock_timeout_ms: 20,
            lock_retries: 1,
            ..LedgerConfig::default()
        });
        let key = StockKey::new(ItemVariantId::new(), LocationId::new());
        opening(&workflows, key, 4);
        let sale_id = sale_of(&workflows, key, 1);

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        std::thread::scope(|scope| {
            let engine = workflows.engine();
            let holder = scope.spawn(move || {
                let hold = MovementBatch::new(
                    IdempotencyKey::new(DocumentRef::Manual, "hold"),
                    vec![MovementRequest::movement(
                        key.item_variant_id,
                        key.location_id,
                        MovementKind::Loss,
                        1,
                        DocumentRef::Manual,
                        UserId::new(),
                    )],
                );
                engine
                    .store()
                    .commit(&hold, Duration::from_millis(50), &mut |_| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(Vec::new())
                    })
                    .unwrap();
            });

            locked_rx.recv().unwrap();
            let err = workflows.checkout(sale_id, UserId::new()).unwrap_err();
            assert!(err.is_retryable());
            release_tx.send(()).unwrap();
            holder.join().unwrap();
        });

        assert_eq!(
            workflows.sale(sale_id).unwrap().unwrap().status(),
            SaleStatus::Open
        );
        workflows.checkout(sale_id, UserId::new()).unwrap();
        assert_eq!(workflows.engine().get_quantity(key).unwrap(), 3);
    }
}
