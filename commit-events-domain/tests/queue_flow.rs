use commit_events_domain::{
    DomainEvent, EntityAndEvent, EntityRef, EventMetadata, EventSource, EventToSend, Phase,
    Status, remove_duplicates,
};
use commit_events_macros::event_source;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug)]
struct PriceChanged {
    cents: u64,
}

impl DomainEvent for PriceChanged {
    const NAME: &'static str = "line.price_changed";
    const METADATA: EventMetadata = EventMetadata::DEFAULT.remove_duplicates();
}

#[derive(Debug)]
struct LineShipped;

impl DomainEvent for LineShipped {
    const NAME: &'static str = "line.shipped";
}

#[event_source]
#[derive(Debug, Default, Serialize, Deserialize)]
struct Line {
    sku: String,
}

fn drain_units(entities: &[EntityRef], phase: Phase) -> Vec<EntityAndEvent> {
    entities
        .iter()
        .flat_map(|entity| {
            let events = match phase {
                Phase::Before => entity.source().drain_before(),
                Phase::During => entity.source().drain_during(),
                Phase::After => entity.source().drain_after(),
            };
            events
                .into_iter()
                .map(|event| EntityAndEvent::new(entity.clone(), event))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn queued_events_flow_through_drain_and_dedup() {
    let a = Arc::new(Line {
        sku: "A-1".into(),
        ..Default::default()
    });
    let b = Arc::new(Line {
        sku: "B-1".into(),
        ..Default::default()
    });
    a.add_event(PriceChanged { cents: 100 }, EventToSend::Before);
    a.add_event(PriceChanged { cents: 120 }, EventToSend::Before);
    a.add_event(LineShipped, EventToSend::BeforeAndAfter);
    b.add_event(PriceChanged { cents: 90 }, EventToSend::Before);

    let entities = vec![EntityRef::new(a.clone()), EntityRef::new(b.clone())];
    let units = remove_duplicates(drain_units(&entities, Phase::Before));

    let seen: Vec<(String, &str)> = units
        .iter()
        .map(|u| {
            let line = u.entity().downcast_ref::<Line>().unwrap();
            (line.sku.clone(), u.event().name())
        })
        .collect();
    assert_eq!(
        seen,
        vec![
            ("A-1".to_string(), "line.price_changed"),
            ("A-1".to_string(), "line.shipped"),
            ("B-1".to_string(), "line.price_changed"),
        ]
    );
    assert_eq!(
        units[0].event().downcast_ref::<PriceChanged>().map(|e| e.cents),
        Some(100)
    );

    // before 已清空，after 分叉的那一份仍在
    assert!(drain_units(&entities, Phase::Before).is_empty());
    assert_eq!(a.event_queue().len(Phase::After), 1);

    // 序列化时忽略事件队列
    let json = serde_json::to_value(&*a).unwrap();
    assert_eq!(json, serde_json::json!({ "sku": "A-1" }));
}

#[test]
fn statuses_from_several_handlers_combine() {
    let mut status: Status<usize> = Status::new();
    status.combine(Status::<()>::success("priced"));
    status.combine(Status::<()>::failure("sku A-1 discontinued"));
    status.combine(Status::<()>::failure("sku B-1 discontinued"));
    status.set_result(2);

    assert!(!status.is_valid());
    assert!(status.result().is_none());
    assert_eq!(
        status.to_string(),
        "Failed with 2 errors: sku A-1 discontinued; sku B-1 discontinued"
    );
}
