use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use url::Url;

use crate::Result;
use crate::error::Error;

type ResolveFn = dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync;

/// Where to connect.
///
/// A resolver is invoked again before every attempt, so a target that moves between retries
/// is honored.
#[non_exhaustive]
#[derive(Clone)]
pub enum Target {
    /// A fixed `ws://` or `wss://` URL
    Fixed(String),
    /// Produces the URL asynchronously, once per attempt
    Resolver(Arc<ResolveFn>),
}

impl Target {
    pub fn fixed<S: Into<String>>(url: S) -> Self {
        Self::Fixed(url.into())
    }

    /// Build a target from an async lookup.
    ///
    /// ```
    /// use resilient_ws::Target;
    ///
    /// let target = Target::resolver(|| async {
    ///     // e.g. ask a discovery service which node to use
    ///     Ok("wss://node-3.example.com/feed".to_owned())
    /// });
    /// # drop(target);
    /// ```
    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::Resolver(Arc::new(move || resolve().boxed()))
    }

    /// Resolve and validate the URL for one connection attempt.
    pub async fn resolve(&self) -> Result<Url> {
        match self {
            Self::Fixed(raw) => parse(raw),
            Self::Resolver(resolve) => {
                let raw = resolve().await?;
                parse(&raw)
            }
        }
    }

    /// Fail early on a fixed target that can never resolve.
    pub(crate) fn check(&self) -> Result<()> {
        match self {
            Self::Fixed(raw) => parse(raw).map(drop),
            Self::Resolver(_) => Ok(()),
        }
    }
}

fn parse(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::resolution(format!(
            "unsupported scheme `{scheme}` in {raw}, expected ws or wss"
        ))),
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(raw) => f.debug_tuple("Fixed").field(raw).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Self::fixed(url)
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Self::Fixed(url)
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Self::Fixed(url.into())
    }
}
