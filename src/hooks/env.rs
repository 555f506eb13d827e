//! Environment allow-listing for hook processes.
//!
//! Hooks never inherit the daemon's environment. They receive the two
//! standard variables plus whatever the hook's environment template
//! renders to, filtered by key prefix.

use std::collections::BTreeMap;

/// Key prefixes (compared case-insensitively) that may reach a hook.
pub const ALLOWED_ENV_PREFIXES: &[&str] = &[
    "EVENT_",
    "NODE_",
    "VIP_",
    "INTERFACE",
    "PATH",
    "HOME",
    "USER",
];

/// Standard variable carrying the firing event name.
pub const EVENT_TYPE_VAR: &str = "EVENT_TYPE";

/// Standard variable carrying this node's ID.
pub const NODE_ID_VAR: &str = "NODE_ID";

/// Whether `key` starts with one of [`ALLOWED_ENV_PREFIXES`], ignoring case.
pub fn is_env_key_allowed(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ALLOWED_ENV_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

/// Drop every pair whose key is not allow-listed. Keys keep their original case.
pub fn sanitize_environment(env: &BTreeMap<String, String>) -> Vec<(String, String)> {
    env.iter()
        .filter(|(key, _)| is_env_key_allowed(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Final process environment: `EVENT_TYPE` and `NODE_ID` first, then the
/// sanitized custom variables.
pub fn build_hook_env(
    event: &str,
    node_id: &str,
    custom: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut env = Vec::with_capacity(custom.len() + 2);
    env.push((EVENT_TYPE_VAR.to_string(), event.to_string()));
    env.push((NODE_ID_VAR.to_string(), node_id.to_string()));
    env.extend(sanitize_environment(custom));
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_drops_unlisted_keys() {
        let out = sanitize_environment(&map(&[("NODE_ID", "n1"), ("BAD_KEY", "x")]));
        assert_eq!(out, vec![("NODE_ID".to_string(), "n1".to_string())]);
    }

    #[test]
    fn test_every_allowed_prefix() {
        let input = map(&[
            ("EVENT_TYPE", "ToMaster"),
            ("NODE_STATUS", "leader"),
            ("VIP_ADDRESS", "192.168.1.100"),
            ("INTERFACE", "eth0"),
            ("PATH", "/usr/bin:/bin"),
            ("HOME", "/home/user"),
            ("USER", "testuser"),
        ]);
        assert_eq!(sanitize_environment(&input).len(), 7);
    }

    #[test]
    fn test_case_insensitive_keys_keep_their_case() {
        let out = sanitize_environment(&map(&[("event_type", "ToMaster"), ("Node_ID", "n1")]));
        assert!(out.contains(&("event_type".to_string(), "ToMaster".to_string())));
        assert!(out.contains(&("Node_ID".to_string(), "n1".to_string())));
    }

    #[test]
    fn test_rejects_lookalikes() {
        for key in ["LD_PRELOAD", "MY_NODE_ID", "VIPADDR", "SHELL", ""] {
            assert!(!is_env_key_allowed(key), "{key} should be rejected");
        }
        assert!(is_env_key_allowed("PATHEXT"));
        assert!(is_env_key_allowed("USERNAME"));
    }

    #[test]
    fn test_empty_map() {
        assert!(sanitize_environment(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_build_hook_env_standard_vars_first() {
        let env = build_hook_env(
            "ToSlave",
            "n2",
            &map(&[("VIP_ADDR", "10.0.0.1"), ("SECRET", "hunter2")]),
        );
        assert_eq!(
            env,
            vec![
                ("EVENT_TYPE".to_string(), "ToSlave".to_string()),
                ("NODE_ID".to_string(), "n2".to_string()),
                ("VIP_ADDR".to_string(), "10.0.0.1".to_string()),
            ]
        );
    }
}
