// Integration tests for the discovery cache lifecycle and event stream

use anyhow::Result;
use devkit_client::service::{
    BrowseEvent, ChannelBackend, DiscoveryCache, DiscoveryRecord, EventKind,
};
use std::net::Ipv4Addr;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn record(last_octet: u8) -> DiscoveryRecord {
    DiscoveryRecord::new(vec![Ipv4Addr::new(10, 0, 0, last_octet)], 32010)
}

#[test]
fn test_event_stream_follows_map_changes() -> Result<()> {
    let (feed, backend) = ChannelBackend::channel();
    let cache = DiscoveryCache::start(backend, WAIT)?;

    feed.send(BrowseEvent::Resolved {
        name: "deck".to_string(),
        record: record(1),
    })?;
    feed.send(BrowseEvent::Removed {
        name: "deck".to_string(),
    })?;
    feed.send(BrowseEvent::Resolved {
        name: "deck".to_string(),
        record: record(2),
    })?;
    feed.send(BrowseEvent::Resolved {
        name: "deck".to_string(),
        record: record(3),
    })?;

    let kinds: Vec<EventKind> = (0..4)
        .map(|_| cache.next_event(WAIT).map(|event| event.kind))
        .collect::<Option<_>>()
        .expect("four events");
    assert_eq!(
        kinds,
        vec![EventKind::Add, EventKind::Remove, EventKind::Add, EventKind::Update]
    );

    assert_eq!(cache.address_for("deck"), Some(Ipv4Addr::new(10, 0, 0, 3)));
    assert_eq!(cache.port_for("deck"), 32010);
    cache.stop();
    Ok(())
}

#[test]
fn test_resolve_waits_for_late_service() -> Result<()> {
    let (feed, backend) = ChannelBackend::channel();
    let cache = DiscoveryCache::start(backend, WAIT)?;

    let endpoint = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(100));
            feed.send(BrowseEvent::Resolved {
                name: "late-deck".to_string(),
                record: record(9),
            })
        });
        cache.resolve("late-deck")
    })?;

    assert_eq!(endpoint.address, Ipv4Addr::new(10, 0, 0, 9));
    cache.stop();
    Ok(())
}

#[test]
fn test_records_stay_readable_after_stop() -> Result<()> {
    let (feed, backend) = ChannelBackend::channel();
    let cache = DiscoveryCache::start(backend, WAIT)?;
    feed.send(BrowseEvent::Resolved {
        name: "deck".to_string(),
        record: record(4),
    })?;
    cache.resolve("deck")?;

    cache.stop();
    cache.stop();

    assert_eq!(cache.names(), vec!["deck".to_string()]);
    assert!(cache.lookup("deck").is_some());
    Ok(())
}
