//! Header sources for connection attempts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Header name to value mapping sent with a connection attempt.
pub type HeaderMap = BTreeMap<String, String>;

/// Closure computing a fresh header map for each connection attempt.
pub type HeaderProvider = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

/// Where the headers of a connection attempt come from.
#[derive(Clone)]
pub enum HeaderSource {
    /// The same headers for every attempt.
    Static(HeaderMap),
    /// Headers recomputed for every attempt (rotating tokens, request ids).
    Dynamic(HeaderProvider),
}

impl HeaderSource {
    /// Headers computed by `provider` on every attempt.
    pub fn dynamic<F>(provider: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(provider))
    }

    /// Whether headers change between attempts.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    /// Headers for the attempt about to be made.
    pub fn resolve(&self) -> HeaderMap {
        match self {
            Self::Static(headers) => headers.clone(),
            Self::Dynamic(provider) => provider(),
        }
    }
}

impl Default for HeaderSource {
    fn default() -> Self {
        Self::Static(HeaderMap::new())
    }
}

impl From<HeaderMap> for HeaderSource {
    fn from(headers: HeaderMap) -> Self {
        Self::Static(headers)
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values are often credentials; only names are printed.
        match self {
            Self::Static(headers) => f
                .debug_tuple("Static")
                .field(&headers.keys().collect::<Vec<_>>())
                .finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_static_headers_resolve_unchanged() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let source = HeaderSource::from(headers.clone());

        assert!(!source.is_dynamic());
        assert_eq!(source.resolve(), headers);
        assert_eq!(source.resolve(), headers);
    }

    #[test]
    fn test_dynamic_headers_recomputed_each_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = counter.clone();
        let source = HeaderSource::dynamic(move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            HeaderMap::from([("X-Attempt".to_string(), n.to_string())])
        });

        assert!(source.is_dynamic());
        assert_eq!(source.resolve()["X-Attempt"], "0");
        assert_eq!(source.resolve()["X-Attempt"], "1");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_hides_values() {
        let source = HeaderSource::from(HeaderMap::from([(
            "Authorization".to_string(),
            "Bearer secret".to_string(),
        )]));
        let debug = format!("{source:?}");
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("secret"));
    }
}
