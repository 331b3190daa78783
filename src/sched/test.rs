use super::enabled;

#[test]
fn test_enabled_states() {
    assert!(!enabled("disabled").unwrap());
    // A scheduler on its way up does not count as installed yet.
    assert!(!enabled("enabling").unwrap());
    assert!(enabled("enabled").unwrap());
}

#[test]
fn test_enabled_rejects_garbage() {
    let err = enabled("exploded").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn test_installed_resolves_on_any_host() {
    // Hosts without sched_ext have no state file at all; the query
    // must come back with a clean error, never a bogus scheduler.
    if let Ok(Some(name)) = super::installed() {
        assert!(!name.is_empty());
    }
}
