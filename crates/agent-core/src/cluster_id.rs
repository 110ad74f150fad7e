//! Deterministic cluster-ID derivation (§4.15 in the original numbering,
//! invariant I6/P4).

use uuid::Uuid;

/// The all-zero UID used when the default namespace can't be fetched, so a
/// cluster-id is always derivable even in a degraded state.
pub const ZERO_UID: &str = "00000000-0000-0000-0000-000000000000";

/// Derives `lowercase(uuid5(NAMESPACE_URL, "d6e_id://<root_uid>/<gateway_id>"))`.
pub fn derive(root_uid: &str, gateway_id: &str) -> String {
    let name = format!("d6e_id://{root_uid}/{gateway_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
        .to_string()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_across_calls() {
        let a = derive("root-uid-1", "default");
        let b = derive("root-uid-1", "default");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_input() {
        assert_ne!(derive("a", "default"), derive("b", "default"));
        assert_ne!(derive("a", "default"), derive("a", "other"));
    }

    #[test]
    fn is_lowercase() {
        let id = derive("ROOT", "default");
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn zero_uid_still_derives() {
        let id = derive(ZERO_UID, "default");
        assert_eq!(id.len(), 36);
    }
}
