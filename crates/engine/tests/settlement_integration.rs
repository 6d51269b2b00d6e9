//! End-to-end engine flows over the in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{CustomerId, Money, RestaurantId, SessionId, TableId};
use domain::{
    BillStatus, BillType, CustomShare, DomainEvent, ItemAssignment, ItemSplit, NewCustomer,
    NewSession, OrderStatus, PaymentStatus, SessionStatus, SessionSummary, SplitPolicy, SplitType,
};
use engine::{
    BlockedReason, Collaborators, Engine, EngineConfig, EngineError, InMemoryMenu,
    InMemoryPaymentCapture, InMemoryTableService, OrderLineRequest,
};
use session_store::{InMemoryRepository, Repository};

struct Fixture {
    engine: Engine<InMemoryRepository>,
    menu: InMemoryMenu,
    payments: InMemoryPaymentCapture,
    tables: InMemoryTableService,
    restaurant_id: RestaurantId,
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let menu = InMemoryMenu::new();
    let payments = InMemoryPaymentCapture::new();
    let tables = InMemoryTableService::new();
    let collaborators = Collaborators::new(
        Arc::new(tables.clone()),
        Arc::new(payments.clone()),
        Arc::new(menu.clone()),
    );
    Fixture {
        engine: Engine::new(Arc::new(InMemoryRepository::new()), collaborators, config),
        menu,
        payments,
        tables,
        restaurant_id: RestaurantId::new(),
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

impl Fixture {
    async fn seat(&self, party_size: u32) -> SessionSummary {
        self.engine
            .lifecycle()
            .start_session(
                NewSession {
                    restaurant_id: self.restaurant_id,
                    table_id: TableId::new(),
                    party_size,
                    split_type: SplitType::Individual,
                    session_name: None,
                },
                Vec::new(),
            )
            .await
            .unwrap()
    }

    /// Places and confirms a one-line order.
    async fn serve(&self, session_id: SessionId, customer_id: CustomerId, cents: i64) {
        let dish = self.menu.add_item("Dish", Money::from_cents(cents));
        let order = self
            .engine
            .orders()
            .place_order(session_id, customer_id, vec![OrderLineRequest::new(dish, 1)])
            .await
            .unwrap();
        self.engine
            .orders()
            .update_order_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap();
    }

    /// Three diners ordering $10, $15 and $20.
    async fn dinner_for_three(&self) -> SessionSummary {
        let summary = self.seat(3).await;
        let id = summary.session.id;
        for (customer, cents) in summary.customers.iter().zip([1000, 1500, 2000]) {
            self.serve(id, customer.id, cents).await;
        }
        summary
    }
}

#[tokio::test]
async fn combined_bill_covers_whole_table() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();

    let outcome = settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();
    assert_eq!(outcome.created.len(), 1);
    let bill = &outcome.created[0];
    assert_eq!(bill.bill_type, BillType::Combined);
    assert_eq!(bill.subtotal, Money::from_cents(4500));
    assert_eq!(bill.customer_id, None);
    assert_eq!(bill.covered_customers.len(), 3);
    assert!(outcome.reconciliation.fully_covered);
    assert!(outcome.reconciliation.warning.is_none());

    let again = settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();
    assert!(again.created.is_empty());
    assert_eq!(again.existing, outcome.created);
}

#[tokio::test]
async fn individual_split_is_idempotent() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();

    let first = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    assert_eq!(first.created.len(), 3);
    let subtotals: Vec<i64> = first.created.iter().map(|b| b.subtotal.cents()).collect();
    assert_eq!(subtotals, vec![1000, 1500, 2000]);

    let second = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    assert!(second.created.is_empty());
    assert_eq!(second.existing.len(), 3);

    let bills = settlement
        .bills_for_session(summary.session.id)
        .await
        .unwrap();
    assert_eq!(bills.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_creates_each_bill_once() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let session_id = summary.session.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let settlement = f.engine.settlement();
        handles.push(tokio::spawn(async move {
            settlement
                .generate_bills(session_id, SplitPolicy::Individual)
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap().unwrap().created.len();
    }
    assert_eq!(created, 3);

    let bills = f.engine.settlement().bills_for_session(session_id).await.unwrap();
    assert_eq!(bills.len(), 3);
    let mut numbers: Vec<&str> = bills.iter().map(|b| b.bill_number.as_str()).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), 3);
}

#[tokio::test]
async fn partial_bills_are_exclusive() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let [a, b, c] = [0, 1, 2].map(|i| summary.customers[i].id);
    let settlement = f.engine.settlement();

    let first = settlement
        .generate_bills(
            summary.session.id,
            SplitPolicy::Partial {
                customer_ids: vec![a, b],
            },
        )
        .await
        .unwrap();
    assert_eq!(first.created[0].subtotal, Money::from_cents(2500));
    assert_eq!(first.created[0].customer_id, Some(a));
    assert!(!first.reconciliation.fully_covered);

    let overlap = settlement
        .generate_bills(
            summary.session.id,
            SplitPolicy::Partial {
                customer_ids: vec![b, c],
            },
        )
        .await;
    assert!(matches!(overlap, Err(EngineError::Conflict(_))));

    let rest = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    assert_eq!(rest.created.len(), 1);
    assert_eq!(rest.created[0].customer_id, Some(c));
    assert_eq!(rest.existing, first.created);
    assert!(rest.reconciliation.fully_covered);
    assert_eq!(rest.reconciliation.outstanding, Money::zero());
}

#[tokio::test]
async fn bill_families_do_not_mix() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();

    settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();
    let result = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn item_split_conserves_every_cent() {
    let f = fixture();
    let summary = f.seat(3).await;
    let session_id = summary.session.id;
    let ids: Vec<CustomerId> = summary.customers.iter().map(|c| c.id).collect();

    let platter = f.menu.add_item("Platter", Money::from_cents(1000));
    let wine = f.menu.add_item("Wine", Money::from_cents(3000));
    let order = f
        .engine
        .orders()
        .place_order(
            session_id,
            ids[0],
            vec![OrderLineRequest::new(platter, 1), OrderLineRequest::new(wine, 1)],
        )
        .await
        .unwrap();

    let outcome = f
        .engine
        .settlement()
        .generate_bills(
            session_id,
            SplitPolicy::ItemLevel {
                assignments: vec![
                    ItemAssignment {
                        order_id: order.id,
                        line_index: 0,
                        split: ItemSplit::Equal {
                            customer_ids: ids.clone(),
                        },
                    },
                    ItemAssignment {
                        order_id: order.id,
                        line_index: 1,
                        split: ItemSplit::Custom {
                            shares: vec![
                                CustomShare {
                                    customer_id: ids[1],
                                    amount: Money::from_cents(2000),
                                },
                                CustomShare {
                                    customer_id: ids[2],
                                    amount: Money::from_cents(1000),
                                },
                            ],
                        },
                    },
                ],
            },
        )
        .await
        .unwrap();

    let subtotals: Vec<i64> = outcome.created.iter().map(|b| b.subtotal.cents()).collect();
    assert_eq!(subtotals, vec![334, 2333, 1333]);
    let billed: Money = outcome.created.iter().map(|b| b.subtotal).sum();
    assert_eq!(billed, order.total());
    assert!(outcome.reconciliation.fully_covered);
    assert!(outcome.reconciliation.warning.is_none());

    let items = f
        .engine
        .repository()
        .bill_items_for_session(session_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 5);
}

#[tokio::test]
async fn custom_split_must_add_up() {
    let f = fixture();
    let summary = f.seat(2).await;
    let ids: Vec<CustomerId> = summary.customers.iter().map(|c| c.id).collect();
    let dish = f.menu.add_item("Dish", Money::from_cents(1000));
    let order = f
        .engine
        .orders()
        .place_order(summary.session.id, ids[0], vec![OrderLineRequest::new(dish, 1)])
        .await
        .unwrap();

    let result = f
        .engine
        .settlement()
        .generate_bills(
            summary.session.id,
            SplitPolicy::ItemLevel {
                assignments: vec![ItemAssignment {
                    order_id: order.id,
                    line_index: 0,
                    split: ItemSplit::Custom {
                        shares: vec![
                            CustomShare {
                                customer_id: ids[0],
                                amount: Money::from_cents(500),
                            },
                            CustomShare {
                                customer_id: ids[1],
                                amount: Money::from_cents(400),
                            },
                        ],
                    },
                }],
            },
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(
        f.engine
            .settlement()
            .bills_for_session(summary.session.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn tip_is_added_to_total() {
    let f = fixture_with(EngineConfig::default().with_tip_bps(1500));
    let summary = f.dinner_for_three().await;

    let outcome = f
        .engine
        .settlement()
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();
    let bill = &outcome.created[0];
    assert_eq!(bill.tip, Money::from_cents(675));
    assert_eq!(bill.total, Money::from_cents(5175));
}

#[tokio::test]
async fn late_order_after_combined_bill_is_flagged() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();
    settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();

    f.serve(summary.session.id, summary.customers[0].id, 500).await;

    let outcome = settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap();
    assert!(outcome.created.is_empty());
    let warning = outcome.reconciliation.warning.unwrap();
    assert_eq!(warning.expected, Money::from_cents(5000));
    assert_eq!(warning.billed, Money::from_cents(4500));
    assert_eq!(warning.difference, Money::from_cents(-500));
}

#[tokio::test]
async fn paying_twice_captures_once() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();
    let outcome = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    let bill = &outcome.created[0];

    let paid = settlement.mark_bill_paid(bill.id, "card").await.unwrap();
    assert_eq!(paid.status, BillStatus::Paid);
    assert_eq!(paid.payment_method.as_deref(), Some("card"));
    assert!(paid.paid_at.is_some());

    let again = settlement.mark_bill_paid(bill.id, "cash").await.unwrap();
    assert_eq!(again.payment_method.as_deref(), Some("card"));
    assert_eq!(f.payments.capture_count(), 1);

    let customers = f
        .engine
        .repository()
        .customers_for_session(summary.session.id)
        .await
        .unwrap();
    let payer = customers.iter().find(|c| Some(c.id) == bill.customer_id).unwrap();
    assert_eq!(payer.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn declined_payment_leaves_bill_pending() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();
    let bill = settlement
        .generate_bills(summary.session.id, SplitPolicy::Combined)
        .await
        .unwrap()
        .created
        .remove(0);

    f.payments.set_decline(true);
    let result = settlement.mark_bill_paid(bill.id, "card").await;
    assert!(matches!(
        result,
        Err(EngineError::ExternalService { service: "payment", .. })
    ));
    assert_eq!(settlement.bill(bill.id).await.unwrap().status, BillStatus::Pending);

    let blank = settlement.mark_bill_paid(bill.id, "  ").await;
    assert!(matches!(blank, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn cancelled_bill_cannot_be_paid_and_frees_customer() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let settlement = f.engine.settlement();
    let first = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    let bill = &first.created[0];

    let cancelled = settlement.cancel_bill(bill.id).await.unwrap();
    assert_eq!(cancelled.status, BillStatus::Cancelled);

    let result = settlement.mark_bill_paid(bill.id, "card").await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
    assert!(matches!(
        settlement.cancel_bill(bill.id).await,
        Err(EngineError::Conflict(_))
    ));

    let rebilled = settlement
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();
    assert_eq!(rebilled.created.len(), 1);
    assert_eq!(rebilled.created[0].customer_id, bill.customer_id);
    assert_ne!(rebilled.created[0].bill_number, bill.bill_number);
}

#[tokio::test]
async fn completion_waits_for_payment() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let session_id = summary.session.id;
    let lifecycle = f.engine.lifecycle();
    let settlement = f.engine.settlement();

    let no_bills = lifecycle.complete_session(session_id, false).await;
    assert!(matches!(
        no_bills,
        Err(EngineError::State {
            reason: BlockedReason::NoBills,
            ..
        })
    ));

    let bill = settlement
        .generate_bills(session_id, SplitPolicy::Combined)
        .await
        .unwrap()
        .created
        .remove(0);

    let unpaid = lifecycle.complete_session(session_id, true).await;
    assert!(matches!(
        unpaid,
        Err(EngineError::State {
            reason: BlockedReason::UnpaidBills { count: 1 },
            ..
        })
    ));
    assert!(matches!(
        lifecycle.cancel_session(session_id).await,
        Err(EngineError::State { .. })
    ));

    settlement.mark_bill_paid(bill.id, "card").await.unwrap();
    let completed = lifecycle.complete_session(session_id, false).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert!(completed.end_time.is_some());
    assert_eq!(f.tables.is_occupied(completed.table_id), Some(false));

    let closed = settlement
        .generate_bills(session_id, SplitPolicy::Combined)
        .await;
    assert!(matches!(
        closed,
        Err(EngineError::State {
            reason: BlockedReason::SessionClosed { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn request_bill_is_repeatable() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let lifecycle = f.engine.lifecycle();

    let first = lifecycle.request_bill(summary.session.id).await.unwrap();
    assert_eq!(first.status, SessionStatus::RequestingBill);
    let second = lifecycle.request_bill(summary.session.id).await.unwrap();
    assert_eq!(second.bill_requested_at, first.bill_requested_at);
}

#[tokio::test]
async fn only_waiting_sessions_can_be_abandoned() {
    let f = fixture();
    let summary = f.dinner_for_three().await;
    let result = f.engine.lifecycle().abandon_session(summary.session.id).await;
    assert!(matches!(
        result,
        Err(EngineError::State {
            reason: BlockedReason::IllegalTransition {
                from: SessionStatus::Active,
                to: SessionStatus::Abandoned
            },
            ..
        })
    ));
}

#[tokio::test]
async fn table_holds_one_open_session() {
    let f = fixture();
    let table_id = TableId::new();
    let new_session = || NewSession {
        restaurant_id: f.restaurant_id,
        table_id,
        party_size: 2,
        split_type: SplitType::Combined,
        session_name: Some("Window".to_string()),
    };
    let lifecycle = f.engine.lifecycle();

    let first = lifecycle.start_session(new_session(), Vec::new()).await.unwrap();
    assert_eq!(first.customers.len(), 2);
    assert!(first.customers[0].is_main_customer);
    assert_eq!(f.tables.is_occupied(table_id), Some(true));

    let second = lifecycle.start_session(new_session(), Vec::new()).await;
    assert!(matches!(second, Err(EngineError::Conflict(_))));

    lifecycle.cancel_session(first.session.id).await.unwrap();
    lifecycle.start_session(new_session(), Vec::new()).await.unwrap();
}

#[tokio::test]
async fn seating_enforces_single_main_customer() {
    let f = fixture();
    let summary = f.seat(2).await;
    let lifecycle = f.engine.lifecycle();

    let second_main = lifecycle
        .add_customer(summary.session.id, NewCustomer::new("Bea", true))
        .await;
    assert!(matches!(second_main, Err(EngineError::Validation(_))));

    lifecycle
        .add_customer(summary.session.id, NewCustomer::new("Bea", false))
        .await
        .unwrap();
    let session = lifecycle.get_session(summary.session.id).await.unwrap();
    assert_eq!(session.party_size, 3);
}

#[tokio::test]
async fn events_follow_commit_order() {
    let f = fixture();
    let summary = f.seat(1).await;
    let session_id = summary.session.id;
    let mut rx = f.engine.broadcaster().subscribe(f.restaurant_id);

    f.serve(session_id, summary.customers[0].id, 1200).await;
    f.engine
        .settlement()
        .generate_bills(session_id, SplitPolicy::Individual)
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.session_id(), session_id);
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            "order-created",
            "order-patch",
            "session-status-changed",
            "bill-generated"
        ]
    );
}

#[tokio::test]
async fn waiter_call_reaches_session_subscriber() {
    let f = fixture();
    let summary = f.seat(2).await;
    let mut sub = f
        .engine
        .broadcaster()
        .subscribe_session(f.restaurant_id, summary.session.id);
    let other = f.seat(1).await;

    f.engine
        .lifecycle()
        .request_waiter(other.session.id, None)
        .await
        .unwrap();
    f.engine
        .lifecycle()
        .request_waiter(summary.session.id, Some(summary.customers[1].id))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        DomainEvent::WaiterRequested(payload) => {
            assert_eq!(payload.session_id, summary.session.id);
            assert_eq!(payload.customer_id, Some(summary.customers[1].id));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let stranger = f
        .engine
        .lifecycle()
        .request_waiter(summary.session.id, Some(CustomerId::new()))
        .await;
    assert!(matches!(stranger, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn held_session_lock_times_out() {
    let f = fixture_with(EngineConfig::default().with_lock_timeout(Duration::from_millis(50)));
    let summary = f.seat(1).await;

    let held = f
        .engine
        .repository()
        .lock_session(summary.session.id)
        .await
        .unwrap();
    let result = f.engine.lifecycle().request_bill(summary.session.id).await;
    assert!(matches!(result, Err(EngineError::Timeout { .. })));
    assert!(result.unwrap_err().is_retryable());
    drop(held);

    f.engine.lifecycle().request_bill(summary.session.id).await.unwrap();
}

#[tokio::test]
async fn idle_sweep_abandons_stale_waiting_sessions() {
    let f = fixture_with(EngineConfig::default().with_idle_window(Duration::from_secs(60)));
    let idle = f.seat(2).await;
    let busy = f.dinner_for_three().await;
    let lifecycle = f.engine.lifecycle();

    assert!(lifecycle.sweep_idle_sessions(Utc::now()).await.unwrap().is_empty());

    let later = Utc::now() + chrono::Duration::minutes(5);
    let abandoned = lifecycle.sweep_idle_sessions(later).await.unwrap();
    assert_eq!(abandoned, vec![idle.session.id]);

    let idle_now = lifecycle.get_session(idle.session.id).await.unwrap();
    assert_eq!(idle_now.status, SessionStatus::Abandoned);
    let busy_now = lifecycle.get_session(busy.session.id).await.unwrap();
    assert_eq!(busy_now.status, SessionStatus::Active);
}

#[tokio::test]
async fn billed_orders_are_locked() {
    let f = fixture();
    let summary = f.seat(2).await;
    let dish = f.menu.add_item("Soup", Money::from_cents(700));
    let orders = f.engine.orders();
    let order = orders
        .place_order(
            summary.session.id,
            summary.customers[0].id,
            vec![OrderLineRequest::new(dish, 2)],
        )
        .await
        .unwrap();

    f.engine
        .settlement()
        .generate_bills(summary.session.id, SplitPolicy::Individual)
        .await
        .unwrap();

    assert!(matches!(
        orders.delete_order(order.id).await,
        Err(EngineError::Conflict(_))
    ));
    assert!(matches!(
        orders
            .update_order_status(order.id, OrderStatus::Cancelled)
            .await,
        Err(EngineError::Conflict(_))
    ));

    let summary = f.engine.lifecycle().summary(summary.session.id).await.unwrap();
    assert_eq!(summary.totals.total_amount, Money::from_cents(1400));
    assert_eq!(summary.totals.billed_amount, Money::from_cents(1400));
    assert_eq!(summary.pending_bills, 1);
}

#[tokio::test]
async fn unknown_menu_item_is_rejected() {
    let f = fixture();
    let summary = f.seat(1).await;
    let result = f
        .engine
        .orders()
        .place_order(
            summary.session.id,
            summary.customers[0].id,
            vec![OrderLineRequest::new(common::MenuItemId::new(), 1)],
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}
