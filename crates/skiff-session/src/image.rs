//! Image layer resolution.

use skiff_core::{BoxFuture, Result};

/// Describes a container image as content-addressed layers and moves
/// the missing ones to the location.
///
/// Layer ids are opaque digests, ordered base first.
pub trait ImageResolver: Send + Sync {
    /// Every layer `image` is built from.
    fn layer_stack<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// The subset of `layers` the location does not hold yet.
    fn missing_layers<'a>(&'a self, layers: &'a [String]) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Transfer `layers` of `image` to the location.
    fn upload<'a>(&'a self, image: &'a str, layers: Vec<String>) -> BoxFuture<'a, Result<()>>;
}
