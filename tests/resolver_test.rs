// Integration tests for machine resolution: discovery + HTTP metadata

use anyhow::Result;
use devkit_client::machine::{DevkitHttpClient, MachineResolver, NameType, ResolveRequest};
use devkit_client::service::{BrowseEvent, ChannelBackend, DiscoveryCache, DiscoveryRecord};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn http() -> DevkitHttpClient {
    DevkitHttpClient::new(Duration::from_secs(2)).unwrap()
}

fn address_request(port: u16) -> ResolveRequest {
    ResolveRequest::new("127.0.0.1")
        .name_type(NameType::Address)
        .http_port(port)
}

#[test]
fn test_address_metadata_from_properties() -> Result<()> {
    let mut server = mockito::Server::new();
    let properties = server
        .mock("GET", "/properties.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"settings": "{\"steam_beta\": false}", "devkit1": ["python3", "devkit-1.py"], "login": "deck"}"#,
        )
        .create();
    let login_name = server.mock("GET", "/login-name").expect(0).create();

    let resolver = MachineResolver::new(None, http());
    let descriptor = resolver.resolve(&address_request(server.socket_address().port()))?;

    assert_eq!(descriptor.address, "127.0.0.1");
    assert_eq!(descriptor.login.as_deref(), Some("deck"));
    assert_eq!(descriptor.entry_point, vec!["python3", "devkit-1.py"]);
    assert_eq!(descriptor.settings["steam_beta"], false);
    properties.assert();
    login_name.assert();
    Ok(())
}

#[test]
fn test_legacy_login_name_fallback() -> Result<()> {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/properties.json")
        .with_status(200)
        .with_body(r#"{"devkit1": "devkit-1"}"#)
        .create();
    server
        .mock("GET", "/login-name")
        .with_status(200)
        .with_body("steamuser\n")
        .create();

    let resolver = MachineResolver::new(None, http());
    let descriptor = resolver.resolve(&address_request(server.socket_address().port()))?;

    assert_eq!(descriptor.login.as_deref(), Some("steamuser"));
    assert_eq!(descriptor.entry_point, vec!["devkit-1"]);
    Ok(())
}

#[test]
fn test_unreachable_metadata_leaves_fields_unset() -> Result<()> {
    // Nothing is mocked, so every request fails
    let server = mockito::Server::new();

    let resolver = MachineResolver::new(None, http());
    let descriptor = resolver.resolve(&address_request(server.socket_address().port()))?;

    assert!(descriptor.login.is_none());
    assert!(descriptor.entry_point.is_empty());
    assert!(descriptor.settings.is_empty());
    Ok(())
}

#[test]
fn test_explicit_login_skips_login_name() -> Result<()> {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/properties.json")
        .with_status(200)
        .with_body(r#"{"login": "deck", "devkit1": "devkit-1"}"#)
        .create();
    let login_name = server.mock("GET", "/login-name").expect(0).create();

    let resolver = MachineResolver::new(None, http());
    let request = address_request(server.socket_address().port()).login(Some("root".to_string()));
    let descriptor = resolver.resolve(&request)?;

    assert_eq!(descriptor.login.as_deref(), Some("root"));
    login_name.assert();
    Ok(())
}

fn advertised(login: &str) -> DiscoveryRecord {
    DiscoveryRecord::new(vec![Ipv4Addr::new(192, 168, 1, 50)], 32000)
        .with_property("txtvers", "1")
        .with_property("login", login)
        .with_property("devkit1", "python3 devkit-1.py")
        .with_property("settings", r#"{"a": 1}"#)
}

#[test]
fn test_guess_with_suffix_matches_service_name() -> Result<()> {
    let (feed, backend) = ChannelBackend::channel();
    let cache = Arc::new(DiscoveryCache::start(backend, Duration::from_secs(2))?);
    feed.send(BrowseEvent::Resolved {
        name: "steamdeck-a1".to_string(),
        record: advertised("deck"),
    })?;

    let resolver = MachineResolver::new(Some(Arc::clone(&cache)), http());
    let guessed = resolver.resolve(&ResolveRequest::new("steamdeck-a1._steamos-devkit._tcp.local."))?;
    let by_service = resolver.resolve(
        &ResolveRequest::new("steamdeck-a1").name_type(NameType::ServiceName),
    )?;

    assert_eq!(guessed, by_service);
    assert_eq!(guessed.name, "steamdeck-a1");
    assert_eq!(guessed.address, "192.168.1.50");
    assert_eq!(guessed.login.as_deref(), Some("deck"));
    assert_eq!(guessed.entry_point, vec!["python3", "devkit-1.py"]);

    cache.stop();
    Ok(())
}

#[test]
fn test_guess_short_name_falls_back_to_address() -> Result<()> {
    let mut server = mockito::Server::new();
    let properties = server
        .mock("GET", "/properties.json")
        .with_status(200)
        .with_body(r#"{"login": "deck", "devkit1": ["devkit-1"]}"#)
        .create();

    let (feed, backend) = ChannelBackend::channel();
    let cache = Arc::new(DiscoveryCache::start(backend, Duration::from_millis(200))?);
    feed.send(BrowseEvent::Resolved {
        name: "steamdeck-a1".to_string(),
        record: advertised("deck"),
    })?;
    cache.resolve("steamdeck-a1")?;

    // Dotless and not advertised, so discovery misses and the name is used as a host
    let resolver = MachineResolver::new(Some(Arc::clone(&cache)), http());
    let request = ResolveRequest::new("localhost").http_port(server.socket_address().port());
    let descriptor = resolver.resolve(&request)?;

    assert_eq!(descriptor.address, "localhost");
    assert_eq!(descriptor.normalized_name, "localhost");
    assert_eq!(descriptor.login.as_deref(), Some("deck"));
    assert_eq!(descriptor.entry_point, vec!["devkit-1"]);
    properties.assert();

    cache.stop();
    Ok(())
}

#[test]
fn test_unsupported_version_is_never_visible() -> Result<()> {
    let (feed, backend) = ChannelBackend::channel();
    let cache = Arc::new(DiscoveryCache::start(backend, Duration::from_millis(300))?);

    feed.send(BrowseEvent::Resolved {
        name: "future-deck".to_string(),
        record: advertised("deck").with_property("txtvers", "2"),
    })?;
    feed.send(BrowseEvent::Resolved {
        name: "current-deck".to_string(),
        record: advertised("deck"),
    })?;

    // Events are applied in order, so once the second is visible the first was handled
    cache.resolve("current-deck")?;
    assert!(cache.lookup("future-deck").is_none());
    assert!(cache.address_for("future-deck").is_none());
    assert_eq!(cache.names(), vec!["current-deck".to_string()]);

    let resolver = MachineResolver::new(Some(Arc::clone(&cache)), http());
    let err = resolver
        .resolve(
            &ResolveRequest::new("future-deck")
                .name_type(NameType::ServiceName)
                .need(false, false),
        )
        .unwrap_err();
    assert!(err.is_machine_not_found());

    cache.stop();
    Ok(())
}
