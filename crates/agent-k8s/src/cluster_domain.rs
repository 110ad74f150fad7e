//! Discovers the cluster's internal DNS domain (normally `cluster.local`) so
//! the ingress resolver can build fully-qualified service names.
//!
//! The in-cluster DNS for the `kubernetes` API service is always a CNAME
//! onto `kubernetes.default.svc.<cluster-domain>.`; resolving that CNAME and
//! stripping the known prefix/suffix recovers the domain without requiring
//! an operator to configure it by hand.

const API_SERVICE_HOST: &str = "kubernetes.default";
const API_SERVICE_PREFIX: &str = "kubernetes.default.svc.";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Resolves the cluster domain via the `kubernetes.default` CNAME, falling
/// back to `fallback` if DNS is unavailable or the response doesn't have the
/// expected shape.
pub async fn resolve(fallback: &str) -> String {
    match lookup_cname(API_SERVICE_HOST).await {
        Ok(Some(cname)) => match strip_api_service_suffix(&cname) {
            Some(domain) => {
                tracing::info!(cluster_domain = %domain, "resolved cluster domain from CNAME");
                domain
            }
            None => {
                tracing::warn!(cname = %cname, "unexpected CNAME shape for kubernetes.default, using fallback");
                fallback.to_string()
            }
        },
        Ok(None) => {
            tracing::info!("no CNAME found for kubernetes.default, using fallback cluster domain");
            fallback.to_string()
        }
        Err(err) => {
            tracing::info!(error = %err, "unable to determine cluster domain from CNAME, using fallback");
            fallback.to_string()
        }
    }
}

fn strip_api_service_suffix(cname: &str) -> Option<String> {
    let trimmed = cname.strip_suffix('.').unwrap_or(cname);
    trimmed.strip_prefix(API_SERVICE_PREFIX).map(str::to_string)
}

async fn lookup_cname(host: &str) -> Result<Option<String>, anyhow::Error> {
    use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
    use trust_dns_resolver::TokioAsyncResolver;

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())?;
    let lookup = resolver.lookup(host, trust_dns_resolver::proto::rr::RecordType::CNAME).await?;
    Ok(lookup.iter().find_map(|record| record.as_cname().map(|name| name.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_suffix() {
        assert_eq!(
            strip_api_service_suffix("kubernetes.default.svc.cluster.local."),
            Some("cluster.local".to_string())
        );
    }

    #[test]
    fn strips_without_trailing_dot() {
        assert_eq!(
            strip_api_service_suffix("kubernetes.default.svc.my-cluster.example."),
            Some("my-cluster.example".to_string())
        );
    }

    #[test]
    fn rejects_unexpected_shape() {
        assert_eq!(strip_api_service_suffix("something-else.example.com."), None);
    }

    #[tokio::test]
    async fn falls_back_when_lookup_fails() {
        let domain = resolve("cluster.local").await;
        assert!(!domain.is_empty());
    }
}
