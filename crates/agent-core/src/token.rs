//! The token-source precedence rule (§4.3 in the original numbering).
//!
//! Kept free of any Kubernetes client dependency so the precedence logic
//! itself can be unit tested against plain maps; `agent-k8s` supplies the
//! watcher-backed data this operates over.

use std::collections::BTreeMap;

/// The key every token-carrying secret or configmap stores its credential
/// under.
pub const TOKEN_KEY: &str = "CLOUD_CONNECT_TOKEN";

/// A named resource's data map, enough to run the precedence rule over
/// either a `Secret` or a `ConfigMap`.
#[derive(Debug, Clone)]
pub struct NamedData<'a> {
    pub name: &'a str,
    pub data: &'a BTreeMap<String, String>,
}

/// Whether `name` is eligible to carry the token: either it matches the
/// operator-configured resource name exactly, or it follows the default
/// naming convention — either is sufficient.
fn is_eligible(name: &str, config_resource_name: Option<&str>) -> bool {
    config_resource_name == Some(name) || name.ends_with("agent-cloud-token")
}

/// Picks the effective token: first secret matching the naming rule with a
/// token key, else first configmap matching the naming rule with a token
/// key, else the bootstrap env value (possibly empty, meaning disabled).
pub fn resolve_effective_token<'a>(
    secrets: impl IntoIterator<Item = NamedData<'a>>,
    config_maps: impl IntoIterator<Item = NamedData<'a>>,
    config_resource_name: Option<&str>,
    bootstrap_env: &str,
) -> String {
    let from_secret = secrets
        .into_iter()
        .filter(|s| is_eligible(s.name, config_resource_name))
        .find_map(|s| s.data.get(TOKEN_KEY).cloned());
    if let Some(token) = from_secret {
        return token;
    }

    let from_config_map = config_maps
        .into_iter()
        .filter(|c| is_eligible(c.name, config_resource_name))
        .find_map(|c| c.data.get(TOKEN_KEY).cloned());
    if let Some(token) = from_config_map {
        return token;
    }

    bootstrap_env.to_string()
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
    fn secret_outranks_configmap_and_env() {
        let secret_data = map(&[(TOKEN_KEY, "SEC")]);
        let cm_data = map(&[(TOKEN_KEY, "CM")]);
        let secrets = vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &secret_data,
        }];
        let config_maps = vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &cm_data,
        }];
        let token = resolve_effective_token(secrets, config_maps, None, "ENV");
        assert_eq!(token, "SEC");
    }

    #[test]
    fn configmap_outranks_env() {
        let cm_data = map(&[(TOKEN_KEY, "CM")]);
        let config_maps = vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &cm_data,
        }];
        let token = resolve_effective_token(std::iter::empty(), config_maps, None, "ENV");
        assert_eq!(token, "CM");
    }

    #[test]
    fn falls_back_to_env_when_nothing_matches() {
        let token = resolve_effective_token(std::iter::empty(), std::iter::empty(), None, "ENV");
        assert_eq!(token, "ENV");
    }

    #[test]
    fn ignores_eligible_resource_missing_the_token_key() {
        let secret_data = map(&[("other-key", "value")]);
        let secrets = vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &secret_data,
        }];
        let token = resolve_effective_token(secrets, std::iter::empty(), None, "ENV");
        assert_eq!(token, "ENV");
    }

    #[test]
    fn explicit_resource_name_overrides_naming_convention() {
        let secret_data = map(&[(TOKEN_KEY, "SEC")]);
        let secrets = vec![NamedData {
            name: "my-custom-name",
            data: &secret_data,
        }];
        let token = resolve_effective_token(secrets, std::iter::empty(), Some("my-custom-name"), "ENV");
        assert_eq!(token, "SEC");
    }
}
